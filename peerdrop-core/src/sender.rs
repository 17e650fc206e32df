//! Sender path: turn a file into a lazy, finite sequence of messages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::chunk::{self, FileDescriptor};
use crate::protocol::{Message, TransferId};

/// A file handed to the engine for sending. The engine owns the bytes until the transfer ends.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl OutgoingFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

/// Caller's grip on a started send. Cloneable; cancelling from any clone takes effect at the next pump.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    id: TransferId,
    cancelled: Arc<AtomicBool>,
}

impl TransferHandle {
    fn new(id: TransferId) -> Self {
        Self {
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &TransferId {
        &self.id
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Header,
    Chunk(u64),
    Done,
}

/// One outbound transfer. Iterating yields the header, then every chunk in index order,
/// slicing lazily so only one chunk is copied at a time. Not restartable.
#[derive(Debug)]
pub struct OutgoingTransfer {
    descriptor: FileDescriptor,
    bytes: Vec<u8>,
    chunk_size: usize,
    cursor: Cursor,
    last_sent: Option<u64>,
    handle: TransferHandle,
}

impl OutgoingTransfer {
    /// `chunk_size` must be non-zero. The engine only passes a validated `EngineConfig::chunk_size`.
    pub(crate) fn new(file: OutgoingFile, chunk_size: usize) -> Self {
        debug_assert!(chunk_size > 0, "chunk size must be non-zero");
        let id = TransferId::generate();
        let total_size = file.bytes.len() as u64;
        let descriptor = FileDescriptor {
            id: id.clone(),
            name: file.name,
            mime_type: file.mime_type,
            total_size,
            total_chunks: chunk::chunk_count(total_size, chunk_size),
        };
        Self {
            descriptor,
            bytes: file.bytes,
            chunk_size,
            cursor: Cursor::Header,
            last_sent: None,
            handle: TransferHandle::new(id),
        }
    }

    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    pub fn id(&self) -> &TransferId {
        &self.descriptor.id
    }

    pub fn handle(&self) -> TransferHandle {
        self.handle.clone()
    }

    /// True once the header has been yielded, i.e. the peer may hold state for this transfer.
    pub fn has_started(&self) -> bool {
        self.cursor != Cursor::Header
    }

    pub fn is_finished(&self) -> bool {
        self.cursor == Cursor::Done
    }

    /// Last chunk index the channel accepted.
    pub fn last_sent(&self) -> Option<u64> {
        self.last_sent
    }

    /// Payload bytes the channel accepted so far.
    pub fn bytes_sent(&self) -> u64 {
        self.last_sent.map_or(0, |i| {
            chunk::chunk_range(self.descriptor.total_size, self.chunk_size, i).end as u64
        })
    }

    /// Record that `msg`, previously yielded by this transfer, was accepted by the channel.
    pub fn confirm_sent(&mut self, msg: &Message) {
        if let Message::Chunk { index, .. } = msg {
            self.last_sent = Some(*index);
        }
    }
}

impl Iterator for OutgoingTransfer {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        match self.cursor {
            Cursor::Header => {
                self.cursor = Cursor::Chunk(0);
                Some(self.descriptor.header_message())
            }
            Cursor::Chunk(index) => {
                let total = self.descriptor.total_chunks;
                self.cursor = if index + 1 == total {
                    Cursor::Done
                } else {
                    Cursor::Chunk(index + 1)
                };
                Some(chunk::chunk_message(
                    &self.descriptor.id,
                    &self.bytes,
                    self.chunk_size,
                    index,
                    total,
                ))
            }
            Cursor::Done => None,
        }
    }
}
