//! peerdrop wire protocol: message types, transfer identifiers and version.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Current protocol version. Bumped whenever `Message` changes shape.
pub const PROTOCOL_VERSION: u8 = 1;

/// Opaque transfer identifier chosen by the sender. Unique per session, never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    /// Fresh random identifier (UUID v4, hyphenated).
    pub fn generate() -> Self {
        TransferId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TransferId {
    fn from(s: &str) -> Self {
        TransferId(s.to_owned())
    }
}

impl From<String> for TransferId {
    fn from(s: String) -> Self {
        TransferId(s)
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// All wire message types. Encoding is bincode (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Announces a transfer. Always precedes its chunks on the channel.
    Header {
        transfer_id: TransferId,
        name: String,
        mime_type: String,
        total_size: u64,
        total_chunks: u64,
    },
    /// One slice of file content. `hash` is the SHA-256 of `payload`.
    Chunk {
        transfer_id: TransferId,
        index: u64,
        payload: Vec<u8>,
        is_last: bool,
        hash: [u8; 32],
    },
    /// Free-form text, never chunked.
    Text { payload: String },
    /// Either side gave up on a transfer; the peer drops its state for it.
    Abort { transfer_id: TransferId },
}

impl Message {
    /// Short tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Header { .. } => "header",
            Message::Chunk { .. } => "chunk",
            Message::Text { .. } => "text",
            Message::Abort { .. } => "abort",
        }
    }

    /// Transfer this message belongs to, if any.
    pub fn transfer_id(&self) -> Option<&TransferId> {
        match self {
            Message::Header { transfer_id, .. }
            | Message::Chunk { transfer_id, .. }
            | Message::Abort { transfer_id } => Some(transfer_id),
            Message::Text { .. } => None,
        }
    }
}
