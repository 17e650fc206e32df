//! Chunk manager: split a file into chunks, describe it, reassemble on the receiving side.

use std::ops::Range;

use crate::error::ErrorKind;
use crate::integrity;
use crate::protocol::{Message, TransferId};

/// Number of chunks for a file of `total_size` bytes. A 0-byte file still has one (empty) chunk.
pub(crate) fn chunk_count(total_size: u64, chunk_size: usize) -> u64 {
    if total_size == 0 {
        return 1;
    }
    total_size.div_ceil(chunk_size as u64)
}

/// Byte range of chunk `index`. Empty for the single chunk of a 0-byte file.
pub(crate) fn chunk_range(total_size: u64, chunk_size: usize, index: u64) -> Range<usize> {
    let start = (index * chunk_size as u64).min(total_size);
    let end = (start + chunk_size as u64).min(total_size);
    start as usize..end as usize
}

/// Immutable description of one transfer, carried by the header message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub id: TransferId,
    pub name: String,
    pub mime_type: String,
    pub total_size: u64,
    pub total_chunks: u64,
}

impl FileDescriptor {
    pub fn header_message(&self) -> Message {
        Message::Header {
            transfer_id: self.id.clone(),
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            total_size: self.total_size,
            total_chunks: self.total_chunks,
        }
    }

    /// Reject headers whose size and chunk count cannot both be true.
    pub fn check_consistent(&self) -> Result<(), ErrorKind> {
        let ok = match (self.total_size, self.total_chunks) {
            (_, 0) => false,
            (0, n) => n == 1,
            (size, n) => n <= size,
        };
        if ok {
            Ok(())
        } else {
            Err(ErrorKind::SizeMismatch(format!(
                "{} chunks cannot carry {} bytes",
                self.total_chunks, self.total_size
            )))
        }
    }
}

/// Build the chunk message for `index` of `bytes`.
pub(crate) fn chunk_message(
    transfer_id: &TransferId,
    bytes: &[u8],
    chunk_size: usize,
    index: u64,
    total_chunks: u64,
) -> Message {
    let payload = bytes[chunk_range(bytes.len() as u64, chunk_size, index)].to_vec();
    Message::Chunk {
        transfer_id: transfer_id.clone(),
        index,
        hash: integrity::hash_chunk(&payload),
        payload,
        is_last: index + 1 == total_chunks,
    }
}

/// Result of accepting one chunk.
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkReceiveResult {
    /// Chunk stored; transfer is now complete and the assembled bytes are ready.
    Complete(Vec<u8>),
    /// Chunk stored; more to come.
    InProgress,
}

/// Receiver-side state for one inbound transfer. Chunks are appended as they arrive,
/// so completion hands over the buffer without a final copy.
#[derive(Debug)]
pub struct InProgressReceive {
    descriptor: FileDescriptor,
    data: Vec<u8>,
    received_count: u64,
}

impl InProgressReceive {
    pub fn new(descriptor: FileDescriptor) -> Self {
        Self {
            descriptor,
            data: Vec::new(),
            received_count: 0,
        }
    }

    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    pub fn received_count(&self) -> u64 {
        self.received_count
    }

    pub fn received_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    /// Index of the last accepted chunk, if any.
    pub fn last_index(&self) -> Option<u64> {
        self.received_count.checked_sub(1)
    }

    /// Validate and store one chunk. Any error means the session must be abandoned.
    pub fn accept(
        &mut self,
        index: u64,
        payload: &[u8],
        is_last: bool,
        hash: &[u8; 32],
    ) -> Result<ChunkReceiveResult, ErrorKind> {
        if index != self.received_count {
            return Err(ErrorKind::OutOfOrderChunk {
                expected: self.received_count,
                got: index,
            });
        }
        if index >= self.descriptor.total_chunks {
            return Err(ErrorKind::SizeMismatch(format!(
                "chunk {} beyond announced count {}",
                index, self.descriptor.total_chunks
            )));
        }
        if !integrity::verify_chunk(payload, hash) {
            return Err(ErrorKind::IntegrityFailed { index });
        }
        let total = self.received_bytes() + payload.len() as u64;
        if total > self.descriptor.total_size {
            return Err(ErrorKind::SizeMismatch(format!(
                "received {} bytes, announced {}",
                total, self.descriptor.total_size
            )));
        }
        self.data.extend_from_slice(payload);
        self.received_count += 1;

        let at_end = self.received_count == self.descriptor.total_chunks;
        match (is_last, at_end) {
            (false, false) => Ok(ChunkReceiveResult::InProgress),
            (true, true) if total == self.descriptor.total_size => {
                Ok(ChunkReceiveResult::Complete(std::mem::take(&mut self.data)))
            }
            (true, true) => Err(ErrorKind::SizeMismatch(format!(
                "assembled {} bytes, announced {}",
                total, self.descriptor.total_size
            ))),
            (true, false) => Err(ErrorKind::SizeMismatch(format!(
                "last flag on chunk {} of {}",
                index, self.descriptor.total_chunks
            ))),
            (false, true) => Err(ErrorKind::SizeMismatch(format!(
                "chunk {} is the last of {} but not flagged",
                index, self.descriptor.total_chunks
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(total_size: u64, total_chunks: u64) -> FileDescriptor {
        FileDescriptor {
            id: TransferId::from("t"),
            name: "f.bin".into(),
            mime_type: "application/octet-stream".into(),
            total_size,
            total_chunks,
        }
    }

    fn feed(
        state: &mut InProgressReceive,
        index: u64,
        payload: &[u8],
        is_last: bool,
    ) -> Result<ChunkReceiveResult, ErrorKind> {
        state.accept(index, payload, is_last, &integrity::hash_chunk(payload))
    }

    #[test]
    fn counts() {
        assert_eq!(chunk_count(100, 30), 4);
        assert_eq!(chunk_count(90, 30), 3);
        assert_eq!(chunk_count(10, 100), 1);
        assert_eq!(chunk_count(0, 30), 1);
        assert_eq!(chunk_count(102_400, 16 * 1024), 7);
    }

    #[test]
    fn ranges() {
        assert_eq!(chunk_range(100, 30, 0), 0..30);
        assert_eq!(chunk_range(100, 30, 3), 90..100);
        assert_eq!(chunk_range(0, 30, 0), 0..0);
    }

    #[test]
    fn chunk_message_flags_last() {
        let bytes: Vec<u8> = (0..100).collect();
        let id = TransferId::from("t");
        match chunk_message(&id, &bytes, 30, 3, 4) {
            Message::Chunk {
                index,
                payload,
                is_last,
                hash,
                ..
            } => {
                assert_eq!(index, 3);
                assert_eq!(payload, (90..100).collect::<Vec<u8>>());
                assert!(is_last);
                assert!(integrity::verify_chunk(&payload, &hash));
            }
            other => panic!("expected Chunk, got {other:?}"),
        }
        assert!(matches!(
            chunk_message(&id, &bytes, 30, 2, 4),
            Message::Chunk { is_last: false, .. }
        ));
    }

    #[test]
    fn consistency_check() {
        assert!(descriptor(0, 1).check_consistent().is_ok());
        assert!(descriptor(100, 4).check_consistent().is_ok());
        assert!(descriptor(0, 2).check_consistent().is_err());
        assert!(descriptor(100, 0).check_consistent().is_err());
        assert!(descriptor(3, 4).check_consistent().is_err());
    }

    #[test]
    fn reassemble_in_order() {
        let bytes: Vec<u8> = (0..100).collect();
        let mut state = InProgressReceive::new(descriptor(100, 4));
        for i in 0..3 {
            let r = feed(&mut state, i, &bytes[chunk_range(100, 30, i)], false).unwrap();
            assert_eq!(r, ChunkReceiveResult::InProgress);
        }
        assert_eq!(state.received_bytes(), 90);
        assert_eq!(state.last_index(), Some(2));
        let r = feed(&mut state, 3, &bytes[90..], true).unwrap();
        assert_eq!(r, ChunkReceiveResult::Complete(bytes));
    }

    #[test]
    fn zero_byte_file() {
        let mut state = InProgressReceive::new(descriptor(0, 1));
        assert_eq!(
            feed(&mut state, 0, &[], true).unwrap(),
            ChunkReceiveResult::Complete(Vec::new())
        );
    }

    #[test]
    fn out_of_order_rejected() {
        let mut state = InProgressReceive::new(descriptor(100, 4));
        feed(&mut state, 0, &[0; 30], false).unwrap();
        assert_eq!(
            feed(&mut state, 2, &[0; 30], false),
            Err(ErrorKind::OutOfOrderChunk {
                expected: 1,
                got: 2
            })
        );
    }

    #[test]
    fn early_last_flag_is_size_mismatch() {
        let mut state = InProgressReceive::new(descriptor(100, 4));
        assert!(matches!(
            feed(&mut state, 0, &[0; 30], true),
            Err(ErrorKind::SizeMismatch(_))
        ));
    }

    #[test]
    fn missing_last_flag_is_size_mismatch() {
        let mut state = InProgressReceive::new(descriptor(10, 1));
        assert!(matches!(
            feed(&mut state, 0, &[0; 10], false),
            Err(ErrorKind::SizeMismatch(_))
        ));
    }

    #[test]
    fn overflowing_bytes_is_size_mismatch() {
        let mut state = InProgressReceive::new(descriptor(10, 2));
        assert!(matches!(
            feed(&mut state, 0, &[0; 11], false),
            Err(ErrorKind::SizeMismatch(_))
        ));
    }

    #[test]
    fn short_file_is_size_mismatch() {
        let mut state = InProgressReceive::new(descriptor(10, 1));
        assert!(matches!(
            feed(&mut state, 0, &[0; 4], true),
            Err(ErrorKind::SizeMismatch(_))
        ));
    }

    #[test]
    fn bad_hash_rejected() {
        let mut state = InProgressReceive::new(descriptor(10, 1));
        assert_eq!(
            state.accept(0, &[1; 10], true, &[0; 32]),
            Err(ErrorKind::IntegrityFailed { index: 0 })
        );
        assert_eq!(state.received_count(), 0);
    }
}
