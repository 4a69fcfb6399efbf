use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{Frame, FrameError, TransferMeta, progress_percent};
use crate::network::link::{LinkError, LinkHandle};

/// Reports from a running file sender back to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingUpdate {
    Progress { file_id: Uuid, sent: u32, percent: u8 },
    Finished { file_id: Uuid },
    Failed { file_id: Uuid, reason: String },
}

#[derive(Debug, Error)]
enum SendFailure {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Streams `FILE_START` then every chunk in index order. The link's bounded
/// queue provides backpressure; `pacing` adds a fixed gap between chunks.
pub async fn send_chunked(
    link: LinkHandle,
    meta: TransferMeta,
    payload: Bytes,
    pacing: Duration,
    updates: mpsc::UnboundedSender<OutgoingUpdate>,
) {
    let file_id = meta.file_id;
    let update = match stream_chunks(&link, &meta, payload, pacing, &updates).await {
        Ok(()) => OutgoingUpdate::Finished { file_id },
        Err(err) => OutgoingUpdate::Failed {
            file_id,
            reason: err.to_string(),
        },
    };
    let _ = updates.send(update);
}

async fn stream_chunks(
    link: &LinkHandle,
    meta: &TransferMeta,
    payload: Bytes,
    pacing: Duration,
    updates: &mpsc::UnboundedSender<OutgoingUpdate>,
) -> Result<(), SendFailure> {
    link.send(meta.start_frame().encode()?).await?;

    for chunk_index in 0..meta.total_chunks {
        let start = chunk_index as usize * meta.chunk_size;
        let end = (start + meta.chunk_size).min(payload.len());
        let frame = Frame::FileChunk {
            file_id: meta.file_id,
            chunk_index,
            content: payload.slice(start..end),
        };
        link.send(frame.encode()?).await?;

        let sent = chunk_index + 1;
        let _ = updates.send(OutgoingUpdate::Progress {
            file_id: meta.file_id,
            sent,
            percent: progress_percent(sent, meta.total_chunks),
        });

        if !pacing.is_zero() && sent < meta.total_chunks {
            tokio::time::sleep(pacing).await;
        }
    }

    Ok(())
}
