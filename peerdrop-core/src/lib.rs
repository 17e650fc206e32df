//! peerdrop: chunked, backpressure-aware file transfer over a reliable ordered message channel.
//! Host-driven: no I/O; host passes channel events and receives transfer events.

pub mod channel;
pub mod chunk;
pub mod config;
pub mod core;
pub mod error;
pub mod event;
pub mod flow;
pub mod integrity;
pub mod protocol;
pub mod sender;
pub mod session;
pub mod wire;

pub use channel::{Channel, ChannelError, ChannelState, MemoryChannel};
pub use chunk::FileDescriptor;
pub use config::{ConfigError, EngineConfig};
pub use crate::core::TransferEngine;
pub use error::{AbortReason, ErrorKind, MessageError};
pub use event::{dispatch_all, Direction, Event, TransferObserver};
pub use protocol::{Message, TransferId, PROTOCOL_VERSION};
pub use sender::{OutgoingFile, TransferHandle};
pub use session::{SessionRegistry, TransferSession};
