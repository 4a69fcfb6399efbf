use std::collections::HashMap;

use bytes::Bytes;
use uuid::Uuid;

use super::{CHUNK_SIZE, ChunkOutcome, DEFAULT_MAX_FILE_SIZE, FileTransfer, TransferMeta};
use crate::common::ReceivedFile;

/// What a receive-side frame did to the transfer table.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingOutcome {
    Started(TransferMeta),
    Progress { file_id: Uuid, percent: u8 },
    Completed(ReceivedFile),
    Ignored,
}

/// Receive-side transfers keyed by file id. A record lives from its
/// `FILE_START` until completion or abort.
#[derive(Debug)]
pub struct IncomingTransfers {
    transfers: HashMap<Uuid, FileTransfer>,
    max_file_size: u64,
}

impl Default for IncomingTransfers {
    fn default() -> Self {
        Self::new()
    }
}

impl IncomingTransfers {
    pub fn new() -> Self {
        Self::with_max_file_size(DEFAULT_MAX_FILE_SIZE)
    }

    /// Announcements above `max_file_size` bytes are ignored.
    pub fn with_max_file_size(max_file_size: u64) -> Self {
        Self {
            transfers: HashMap::new(),
            max_file_size,
        }
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn on_start(&mut self, meta: TransferMeta) -> IncomingOutcome {
        if self.transfers.contains_key(&meta.file_id) {
            log::warn!("Duplicate FILE_START for {} ignored", meta.file_id);
            return IncomingOutcome::Ignored;
        }

        if meta.total_size > self.max_file_size {
            log::warn!(
                "FILE_START for {} announces {} bytes, limit is {}; ignoring",
                meta.file_id,
                meta.total_size,
                self.max_file_size
            );
            return IncomingOutcome::Ignored;
        }

        let expected = super::chunk_count(meta.total_size, meta.chunk_size);
        if expected != Some(meta.total_chunks) {
            log::warn!(
                "FILE_START for {} announces {} chunks for {} bytes; ignoring",
                meta.file_id,
                meta.total_chunks,
                meta.total_size
            );
            return IncomingOutcome::Ignored;
        }

        log::info!(
            "Receiving '{}' ({} bytes, {} chunks)",
            meta.file_name,
            meta.total_size,
            meta.total_chunks
        );

        let mut transfer = FileTransfer::incoming(meta.clone());
        if meta.total_chunks == 0 {
            // Empty file: nothing will follow the start frame.
            return match transfer.assemble() {
                Some(bytes) => IncomingOutcome::Completed(received(&transfer.meta, bytes)),
                None => IncomingOutcome::Ignored,
            };
        }

        self.transfers.insert(meta.file_id, transfer);
        IncomingOutcome::Started(meta)
    }

    pub fn on_chunk(&mut self, file_id: Uuid, chunk_index: u32, content: Bytes) -> IncomingOutcome {
        let Some(transfer) = self.transfers.get_mut(&file_id) else {
            log::debug!("Chunk {chunk_index} for unknown transfer {file_id} ignored");
            return IncomingOutcome::Ignored;
        };

        match transfer.store_chunk(chunk_index, content) {
            ChunkOutcome::Stored => {}
            ChunkOutcome::Duplicate => {
                log::debug!("Duplicate chunk {chunk_index} for {file_id}");
                return IncomingOutcome::Ignored;
            }
            other => {
                log::warn!("Chunk {chunk_index} for {file_id} dropped: {other:?}");
                return IncomingOutcome::Ignored;
            }
        }

        if !transfer.is_complete() {
            return IncomingOutcome::Progress {
                file_id,
                percent: transfer.progress(),
            };
        }

        let Some(mut transfer) = self.transfers.remove(&file_id) else {
            return IncomingOutcome::Ignored;
        };
        match transfer.assemble() {
            Some(bytes) => {
                log::info!("Transfer '{}' complete", transfer.meta.file_name);
                IncomingOutcome::Completed(received(&transfer.meta, bytes))
            }
            None => IncomingOutcome::Ignored,
        }
    }

    /// Aborts every in-flight receive and hands the records back so the
    /// caller can report them.
    pub fn abort_all(&mut self) -> Vec<FileTransfer> {
        self.transfers
            .drain()
            .map(|(_, mut transfer)| {
                transfer.abort();
                transfer
            })
            .collect()
    }
}

impl TransferMeta {
    /// Metadata announced by a remote `FILE_START`.
    pub fn announced(
        file_id: Uuid,
        file_name: String,
        mime_type: String,
        total_size: u64,
        total_chunks: u32,
    ) -> Self {
        Self {
            file_id,
            file_name,
            mime_type,
            total_size,
            total_chunks,
            chunk_size: CHUNK_SIZE,
        }
    }
}

fn received(meta: &TransferMeta, bytes: Bytes) -> ReceivedFile {
    ReceivedFile {
        file_id: meta.file_id,
        file_name: meta.file_name.clone(),
        mime_type: meta.mime_type.clone(),
        bytes,
        saved_to: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferStatus;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn chunks_of(data: &[u8]) -> Vec<Bytes> {
        data.chunks(CHUNK_SIZE).map(Bytes::copy_from_slice).collect()
    }

    fn start(table: &mut IncomingTransfers, data: &[u8]) -> Uuid {
        let meta = TransferMeta::new("report.pdf".into(), "application/pdf".into(), data.len() as u64);
        let file_id = meta.file_id;
        assert!(matches!(table.on_start(meta), IncomingOutcome::Started(_)));
        file_id
    }

    #[test]
    fn forty_thousand_byte_file_reassembles_byte_exact() {
        let data = payload(40_000);
        let chunks = chunks_of(&data);
        assert_eq!(
            chunks.iter().map(Bytes::len).collect::<Vec<_>>(),
            vec![16384, 16384, 7232]
        );

        let mut table = IncomingTransfers::new();
        let file_id = start(&mut table, &data);

        assert_eq!(
            table.on_chunk(file_id, 0, chunks[0].clone()),
            IncomingOutcome::Progress { file_id, percent: 33 }
        );
        assert_eq!(
            table.on_chunk(file_id, 1, chunks[1].clone()),
            IncomingOutcome::Progress { file_id, percent: 67 }
        );
        match table.on_chunk(file_id, 2, chunks[2].clone()) {
            IncomingOutcome::Completed(file) => {
                assert_eq!(file.bytes.as_ref(), data.as_slice());
                assert_eq!(file.mime_type, "application/pdf");
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(table.is_empty());
    }

    #[test]
    fn five_chunks_in_reverse_match_forward_delivery() {
        let data = payload(4 * CHUNK_SIZE + 1234);
        let chunks = chunks_of(&data);
        assert_eq!(chunks.len(), 5);

        let deliver = |order: Vec<usize>| {
            let mut table = IncomingTransfers::new();
            let file_id = start(&mut table, &data);
            let mut completions = Vec::new();
            for index in order {
                if let IncomingOutcome::Completed(file) =
                    table.on_chunk(file_id, index as u32, chunks[index].clone())
                {
                    completions.push(file.bytes);
                }
            }
            assert_eq!(completions.len(), 1);
            completions.remove(0)
        };

        let forward = deliver((0..5).collect());
        let reverse = deliver((0..5).rev().collect());
        assert_eq!(reverse, forward);
        assert_eq!(reverse.as_ref(), data.as_slice());
    }

    #[test]
    fn announcement_above_limit_is_ignored() {
        let mut table = IncomingTransfers::with_max_file_size(1024);
        let meta = TransferMeta::new("big.iso".into(), "application/octet-stream".into(), 1025);
        assert_eq!(table.on_start(meta), IncomingOutcome::Ignored);
        assert!(table.is_empty());
    }

    #[test]
    fn wrapping_chunk_count_is_ignored() {
        let mut table = IncomingTransfers::with_max_file_size(u64::MAX);
        let total_size = (u64::from(u32::MAX) + 1) * CHUNK_SIZE as u64;
        let meta = TransferMeta::announced(Uuid::new_v4(), "x".into(), "text/plain".into(), total_size, 0);
        assert_eq!(table.on_start(meta), IncomingOutcome::Ignored);
        assert!(table.is_empty());
    }

    #[test]
    fn huge_consistent_announcement_allocates_nothing_up_front() {
        let mut table = IncomingTransfers::with_max_file_size(u64::MAX);
        let total_chunks = 1_000_000_000u32;
        let total_size = u64::from(total_chunks) * CHUNK_SIZE as u64;
        let meta = TransferMeta::announced(Uuid::new_v4(), "x".into(), "text/plain".into(), total_size, total_chunks);
        let file_id = meta.file_id;
        assert!(matches!(table.on_start(meta), IncomingOutcome::Started(_)));
        assert_eq!(
            table.on_chunk(file_id, total_chunks - 1, Bytes::from(vec![0u8; CHUNK_SIZE])),
            IncomingOutcome::Progress { file_id, percent: 0 }
        );
        assert_eq!(table.abort_all().len(), 1);
    }

    #[test]
    fn reverse_order_delivery_completes() {
        let data = payload(40 * 1024);
        let chunks = chunks_of(&data);
        let mut table = IncomingTransfers::new();
        let file_id = start(&mut table, &data);

        let mut completed = None;
        for (index, chunk) in chunks.iter().enumerate().rev() {
            if let IncomingOutcome::Completed(file) = table.on_chunk(file_id, index as u32, chunk.clone()) {
                completed = Some(file);
            }
        }
        assert_eq!(completed.unwrap().bytes.as_ref(), data.as_slice());
    }

    #[test]
    fn completion_fires_exactly_once() {
        let data = payload(20_000);
        let chunks = chunks_of(&data);
        let mut table = IncomingTransfers::new();
        let file_id = start(&mut table, &data);

        assert_eq!(
            table.on_chunk(file_id, 0, chunks[0].clone()),
            IncomingOutcome::Progress { file_id, percent: 50 }
        );
        assert_eq!(
            table.on_chunk(file_id, 0, chunks[0].clone()),
            IncomingOutcome::Ignored
        );
        assert!(matches!(
            table.on_chunk(file_id, 1, chunks[1].clone()),
            IncomingOutcome::Completed(_)
        ));
        assert_eq!(
            table.on_chunk(file_id, 1, chunks[1].clone()),
            IncomingOutcome::Ignored
        );
    }

    #[test]
    fn unknown_file_id_is_ignored() {
        let mut table = IncomingTransfers::new();
        assert_eq!(
            table.on_chunk(Uuid::new_v4(), 0, Bytes::from_static(b"x")),
            IncomingOutcome::Ignored
        );
    }

    #[test]
    fn duplicate_start_keeps_first_record() {
        let data = payload(20_000);
        let mut table = IncomingTransfers::new();
        let file_id = start(&mut table, &data);
        table.on_chunk(file_id, 0, chunks_of(&data)[0].clone());

        let again = TransferMeta::announced(file_id, "other".into(), "text/plain".into(), 20_000, 2);
        assert_eq!(table.on_start(again), IncomingOutcome::Ignored);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn inconsistent_chunk_count_is_rejected() {
        let mut table = IncomingTransfers::new();
        let meta = TransferMeta::announced(Uuid::new_v4(), "a".into(), "text/plain".into(), 40 * 1024, 2);
        assert_eq!(table.on_start(meta), IncomingOutcome::Ignored);
        assert!(table.is_empty());
    }

    #[test]
    fn zero_byte_file_completes_on_start() {
        let mut table = IncomingTransfers::new();
        let meta = TransferMeta::new("empty.txt".into(), "text/plain".into(), 0);
        match table.on_start(meta) {
            IncomingOutcome::Completed(file) => assert!(file.bytes.is_empty()),
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(table.is_empty());
    }

    #[test]
    fn abort_after_first_chunk_discards_partial_data() {
        let data = payload(40 * 1024);
        let chunks = chunks_of(&data);
        let mut table = IncomingTransfers::new();
        let file_id = start(&mut table, &data);
        table.on_chunk(file_id, 0, chunks[0].clone());

        let aborted = table.abort_all();
        assert_eq!(aborted.len(), 1);
        assert_eq!(aborted[0].status(), TransferStatus::Aborted);
        assert_eq!(
            table.on_chunk(file_id, 1, chunks[1].clone()),
            IncomingOutcome::Ignored
        );
    }
}
