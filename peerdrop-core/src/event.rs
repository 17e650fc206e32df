//! Events the engine hands back to the host, and an observer trait to route them.

use crate::chunk::FileDescriptor;
use crate::error::ErrorKind;
use crate::protocol::TransferId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Peer announced a transfer.
    HeaderReceived { descriptor: FileDescriptor },
    ChunkReceived {
        transfer_id: TransferId,
        index: u64,
        bytes_done: u64,
        total_bytes: u64,
    },
    ChunkSent {
        transfer_id: TransferId,
        index: u64,
        bytes_done: u64,
        total_bytes: u64,
    },
    /// Every chunk of an outbound transfer was accepted by the channel.
    SendFinished { transfer_id: TransferId },
    /// Inbound transfer assembled; `bytes` is the whole file.
    TransferComplete {
        descriptor: FileDescriptor,
        bytes: Vec<u8>,
    },
    TextReceived { payload: String },
    TransferError {
        transfer_id: TransferId,
        kind: ErrorKind,
    },
}

impl Event {
    /// Route this event to the matching observer callback.
    pub fn dispatch<O: TransferObserver + ?Sized>(self, observer: &mut O) {
        match self {
            Event::HeaderReceived { descriptor } => observer.on_header(&descriptor),
            Event::ChunkReceived {
                transfer_id,
                bytes_done,
                total_bytes,
                ..
            } => observer.on_progress(&transfer_id, Direction::Inbound, bytes_done, total_bytes),
            Event::ChunkSent {
                transfer_id,
                bytes_done,
                total_bytes,
                ..
            } => observer.on_progress(&transfer_id, Direction::Outbound, bytes_done, total_bytes),
            Event::SendFinished { transfer_id } => observer.on_sent(&transfer_id),
            Event::TransferComplete { descriptor, bytes } => {
                observer.on_complete(&descriptor.id, bytes, &descriptor)
            }
            Event::TextReceived { payload } => observer.on_text(&payload),
            Event::TransferError { transfer_id, kind } => observer.on_error(&transfer_id, &kind),
        }
    }
}

/// Dispatch a batch of events in order.
pub fn dispatch_all<O: TransferObserver + ?Sized>(events: Vec<Event>, observer: &mut O) {
    for event in events {
        event.dispatch(observer);
    }
}

/// Host callbacks. Every method defaults to a no-op.
pub trait TransferObserver {
    fn on_header(&mut self, _descriptor: &FileDescriptor) {}

    fn on_progress(
        &mut self,
        _transfer_id: &TransferId,
        _direction: Direction,
        _bytes_done: u64,
        _total_bytes: u64,
    ) {
    }

    fn on_sent(&mut self, _transfer_id: &TransferId) {}

    fn on_complete(&mut self, _transfer_id: &TransferId, _bytes: Vec<u8>, _descriptor: &FileDescriptor) {}

    fn on_text(&mut self, _payload: &str) {}

    fn on_error(&mut self, _transfer_id: &TransferId, _kind: &ErrorKind) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        progress: Vec<(Direction, u64, u64)>,
        completed: Vec<(TransferId, usize)>,
        texts: Vec<String>,
        errors: Vec<ErrorKind>,
    }

    impl TransferObserver for Recorder {
        fn on_progress(&mut self, _: &TransferId, d: Direction, done: u64, total: u64) {
            self.progress.push((d, done, total));
        }
        fn on_complete(&mut self, id: &TransferId, bytes: Vec<u8>, _: &FileDescriptor) {
            self.completed.push((id.clone(), bytes.len()));
        }
        fn on_text(&mut self, payload: &str) {
            self.texts.push(payload.to_owned());
        }
        fn on_error(&mut self, _: &TransferId, kind: &ErrorKind) {
            self.errors.push(kind.clone());
        }
    }

    #[test]
    fn events_route_to_callbacks() {
        let id = TransferId::from("x");
        let descriptor = FileDescriptor {
            id: id.clone(),
            name: "n".into(),
            mime_type: "m".into(),
            total_size: 3,
            total_chunks: 1,
        };
        let events = vec![
            Event::HeaderReceived {
                descriptor: descriptor.clone(),
            },
            Event::ChunkSent {
                transfer_id: id.clone(),
                index: 0,
                bytes_done: 3,
                total_bytes: 3,
            },
            Event::ChunkReceived {
                transfer_id: id.clone(),
                index: 0,
                bytes_done: 1,
                total_bytes: 3,
            },
            Event::TransferComplete {
                descriptor,
                bytes: vec![1, 2, 3],
            },
            Event::TextReceived {
                payload: "hello".into(),
            },
            Event::TransferError {
                transfer_id: id.clone(),
                kind: ErrorKind::UnknownTransfer,
            },
        ];
        let mut rec = Recorder::default();
        dispatch_all(events, &mut rec);
        assert_eq!(
            rec.progress,
            vec![(Direction::Outbound, 3, 3), (Direction::Inbound, 1, 3)]
        );
        assert_eq!(rec.completed, vec![(id, 3)]);
        assert_eq!(rec.texts, vec!["hello".to_string()]);
        assert_eq!(rec.errors, vec![ErrorKind::UnknownTransfer]);
    }
}
