//! Error taxonomy. Every transfer-level failure is reported against a transfer id.

use crate::channel::ChannelError;
use crate::wire::DecodeError;

/// Why a transfer was abandoned. Partial data is always discarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbortReason {
    #[error("cancelled locally")]
    Cancelled,
    #[error("cancelled by peer")]
    PeerCancelled,
    #[error("channel closed")]
    ChannelClosed,
    #[error("send failed: {0}")]
    SendFailed(ChannelError),
    /// The transport failed outside of a send, e.g. a reset or a truncated read.
    #[error("channel error: {0}")]
    ChannelError(ChannelError),
}

/// Per-transfer error kinds surfaced to the host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("duplicate transfer")]
    DuplicateTransfer,
    #[error("unknown transfer")]
    UnknownTransfer,
    #[error("out of order chunk: expected {expected}, got {got}")]
    OutOfOrderChunk { expected: u64, got: u64 },
    #[error("size mismatch: {0}")]
    SizeMismatch(String),
    #[error("chunk integrity check failed at index {index}")]
    IntegrityFailed { index: u64 },
    #[error("transfer of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: u64, limit: u64 },
    #[error("transfer aborted ({reason}), last index {last_index:?}")]
    TransferAborted {
        /// Last chunk index sent (sender) or accepted (receiver); `None` if no chunk made it.
        last_index: Option<u64>,
        reason: AbortReason,
    },
}

/// Failure to process an incoming channel message before any transfer could be identified.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("channel is not open")]
    NotOpen,
    #[error("failed to decode message: {0}")]
    DecodeFailed(#[from] DecodeError),
}
