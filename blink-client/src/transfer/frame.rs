//! Frames carried on the direct channel.
//!
//! Every message is a compact binary envelope:
//!
//!   [1 byte: frame type] [N bytes: body]
//!
//! 0x01 = control, body is JSON (`TEXT` or `FILE_START`)
//! 0x02 = chunk, body is 16 bytes file id + 4 bytes big-endian index + raw data
//!
//! Chunk bytes travel as-is, no base64.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const FRAME_CONTROL: u8 = 0x01;
const FRAME_CHUNK: u8 = 0x02;
const CHUNK_HEADER_LEN: usize = 16 + 4;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,

    #[error("unknown frame type: 0x{0:02x}")]
    UnknownType(u8),

    #[error("chunk frame too short ({0} bytes)")]
    Truncated(usize),

    #[error("control frame decode error: {0}")]
    Control(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text {
        content: String,
    },
    FileStart {
        file_id: Uuid,
        file_name: String,
        mime_type: String,
        total_size: u64,
        total_chunks: u32,
    },
    FileChunk {
        file_id: Uuid,
        chunk_index: u32,
        content: Bytes,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum Control {
    Text {
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    FileStart {
        file_id: Uuid,
        file_name: String,
        mime_type: String,
        total_size: u64,
        total_chunks: u32,
    },
}

impl Frame {
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let control = match self {
            Frame::FileChunk {
                file_id,
                chunk_index,
                content,
            } => {
                let mut buf = BytesMut::with_capacity(1 + CHUNK_HEADER_LEN + content.len());
                buf.put_u8(FRAME_CHUNK);
                buf.put_slice(file_id.as_bytes());
                buf.put_u32(*chunk_index);
                buf.put_slice(content);
                return Ok(buf.freeze());
            }
            Frame::Text { content } => Control::Text {
                content: content.clone(),
            },
            Frame::FileStart {
                file_id,
                file_name,
                mime_type,
                total_size,
                total_chunks,
            } => Control::FileStart {
                file_id: *file_id,
                file_name: file_name.clone(),
                mime_type: mime_type.clone(),
                total_size: *total_size,
                total_chunks: *total_chunks,
            },
        };

        let json = serde_json::to_vec(&control)?;
        let mut buf = BytesMut::with_capacity(1 + json.len());
        buf.put_u8(FRAME_CONTROL);
        buf.put_slice(&json);
        Ok(buf.freeze())
    }

    pub fn decode(frame: &Bytes) -> Result<Frame, FrameError> {
        let Some(&frame_type) = frame.first() else {
            return Err(FrameError::Empty);
        };
        let body = frame.slice(1..);

        match frame_type {
            FRAME_CONTROL => Ok(match serde_json::from_slice::<Control>(&body)? {
                Control::Text { content } => Frame::Text { content },
                Control::FileStart {
                    file_id,
                    file_name,
                    mime_type,
                    total_size,
                    total_chunks,
                } => Frame::FileStart {
                    file_id,
                    file_name,
                    mime_type,
                    total_size,
                    total_chunks,
                },
            }),
            FRAME_CHUNK => {
                if body.len() < CHUNK_HEADER_LEN {
                    return Err(FrameError::Truncated(body.len()));
                }
                let mut id = [0u8; 16];
                id.copy_from_slice(&body[..16]);
                let mut index = [0u8; 4];
                index.copy_from_slice(&body[16..CHUNK_HEADER_LEN]);
                Ok(Frame::FileChunk {
                    file_id: Uuid::from_bytes(id),
                    chunk_index: u32::from_be_bytes(index),
                    content: body.slice(CHUNK_HEADER_LEN..),
                })
            }
            other => Err(FrameError::UnknownType(other)),
        }
    }
}
