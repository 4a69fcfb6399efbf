//! Chunked file transfer over the direct channel.

pub mod frame;
pub mod incoming;
pub mod outgoing;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use uuid::Uuid;

pub use frame::{Frame, FrameError};
pub use incoming::{IncomingOutcome, IncomingTransfers};
pub use outgoing::{OutgoingUpdate, send_chunked};

/// Protocol-wide chunk size.
pub const CHUNK_SIZE: usize = 16 * 1024;
/// Largest file accepted in either direction unless configured otherwise.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Sending,
    Receiving,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMeta {
    pub file_id: Uuid,
    pub file_name: String,
    pub mime_type: String,
    pub total_size: u64,
    pub total_chunks: u32,
    pub chunk_size: usize,
}

impl TransferMeta {
    /// Metadata for a local file. Callers keep `total_size` under the
    /// configured limit, so the chunk count always fits.
    pub fn new(file_name: String, mime_type: String, total_size: u64) -> Self {
        Self {
            file_id: Uuid::new_v4(),
            file_name,
            mime_type,
            total_size,
            total_chunks: chunk_count(total_size, CHUNK_SIZE).unwrap_or(u32::MAX),
            chunk_size: CHUNK_SIZE,
        }
    }

    /// Exact byte length chunk `index` must have.
    pub fn chunk_len(&self, index: u32) -> Option<usize> {
        if index >= self.total_chunks {
            return None;
        }
        let offset = u64::from(index) * self.chunk_size as u64;
        let remaining = self.total_size.checked_sub(offset)?;
        usize::try_from(remaining.min(self.chunk_size as u64)).ok()
    }

    pub fn start_frame(&self) -> Frame {
        Frame::FileStart {
            file_id: self.file_id,
            file_name: self.file_name.clone(),
            mime_type: self.mime_type.clone(),
            total_size: self.total_size,
            total_chunks: self.total_chunks,
        }
    }
}

/// Outcome of storing one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Stored,
    Duplicate,
    OutOfRange,
    /// Length differs from what the announced size implies for this index.
    WrongLength,
    /// Transfer is no longer receiving.
    Inactive,
}

/// One transfer, either direction. Receive side keeps `received_chunks` by
/// index as they arrive; the send side only counts chunks handed to the
/// channel.
#[derive(Debug, Clone)]
pub struct FileTransfer {
    pub meta: TransferMeta,
    received_chunks: BTreeMap<u32, Bytes>,
    received_count: u32,
    status: TransferStatus,
}

impl FileTransfer {
    pub fn incoming(meta: TransferMeta) -> Self {
        Self {
            meta,
            received_chunks: BTreeMap::new(),
            received_count: 0,
            status: TransferStatus::Receiving,
        }
    }

    pub fn outgoing(meta: TransferMeta) -> Self {
        Self {
            meta,
            received_chunks: BTreeMap::new(),
            received_count: 0,
            status: TransferStatus::Sending,
        }
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn received_count(&self) -> u32 {
        self.received_count
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            TransferStatus::Sending | TransferStatus::Receiving
        )
    }

    /// Stores a chunk at its index. Out-of-order delivery is fine; a repeated
    /// index is ignored so `received_count` never double counts.
    pub fn store_chunk(&mut self, chunk_index: u32, content: Bytes) -> ChunkOutcome {
        if self.status != TransferStatus::Receiving {
            return ChunkOutcome::Inactive;
        }
        let Some(expected) = self.meta.chunk_len(chunk_index) else {
            return ChunkOutcome::OutOfRange;
        };
        if self.received_chunks.contains_key(&chunk_index) {
            return ChunkOutcome::Duplicate;
        }
        if content.len() != expected {
            return ChunkOutcome::WrongLength;
        }
        self.received_chunks.insert(chunk_index, content);
        self.received_count += 1;
        ChunkOutcome::Stored
    }

    /// Send side: one more chunk handed to the channel.
    pub fn record_sent(&mut self, sent_chunks: u32) {
        if self.status == TransferStatus::Sending {
            self.received_count = sent_chunks.min(self.meta.total_chunks);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.received_count == self.meta.total_chunks
    }

    pub fn progress(&self) -> u8 {
        progress_percent(self.received_count, self.meta.total_chunks)
    }

    /// Concatenates the slots in index order and marks the transfer
    /// completed. Returns `None` unless every chunk has arrived.
    pub fn assemble(&mut self) -> Option<Bytes> {
        if self.status != TransferStatus::Receiving || !self.is_complete() {
            return None;
        }
        let received: usize = self.received_chunks.values().map(Bytes::len).sum();
        if received as u64 != self.meta.total_size {
            return None;
        }
        let mut out = BytesMut::with_capacity(received);
        for chunk in std::mem::take(&mut self.received_chunks).into_values() {
            out.extend_from_slice(&chunk);
        }
        self.status = TransferStatus::Completed;
        Some(out.freeze())
    }

    pub fn mark_completed(&mut self) {
        self.status = TransferStatus::Completed;
    }

    /// Marks an active transfer aborted and drops any partial data.
    pub fn abort(&mut self) {
        if self.is_active() {
            self.status = TransferStatus::Aborted;
            self.received_chunks.clear();
        }
    }
}

/// Chunks needed for `total_size` bytes, or `None` if the count does not
/// fit the wire's `u32` index.
pub fn chunk_count(total_size: u64, chunk_size: usize) -> Option<u32> {
    u32::try_from(total_size.div_ceil(chunk_size as u64)).ok()
}

pub fn progress_percent(done: u32, total: u32) -> u8 {
    if total == 0 {
        return 100;
    }
    ((f64::from(done) / f64::from(total)) * 100.0).round().min(100.0) as u8
}

/// Best-effort MIME type from the file extension.
pub fn guess_mime_type(file_name: &str) -> &'static str {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("txt") | Some("log") | Some("md") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

/// Strips path components and control characters from a remote-supplied name.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    let base = base.trim().trim_start_matches('.');
    if base.is_empty() {
        "download".to_string()
    } else {
        base.to_string()
    }
}

/// Writes a received file into `dir`, picking `name (n).ext` if the name is
/// taken.
pub async fn save_received(dir: &Path, file_name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;

    let name = sanitize_file_name(file_name);
    let stem = Path::new(&name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("download")
        .to_string();
    let extension = Path::new(&name)
        .extension()
        .and_then(|s| s.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();

    let mut candidate = dir.join(&name);
    let mut n = 1;
    while tokio::fs::try_exists(&candidate).await? {
        candidate = dir.join(format!("{stem} ({n}){extension}"));
        n += 1;
    }

    tokio::fs::write(&candidate, bytes).await?;
    Ok(candidate)
}
