//! The reliable, ordered, message-preserving transport the engine writes to.
//! Owned by the host; the engine only borrows it for the duration of a call.

use std::collections::VecDeque;

/// Transport-level failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is not open")]
    NotOpen,
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("message of {len} bytes exceeds channel limit of {max}")]
    MessageTooLarge { len: usize, max: usize },
    /// Failure reported by the host's transport outside of a send.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Reliable, ordered, message-boundary-preserving duplex transport.
pub trait Channel {
    /// Queue one message. Fails with `NotOpen` once the channel is closed.
    fn send(&mut self, message: &[u8]) -> Result<(), ChannelError>;

    fn is_open(&self) -> bool;

    /// Bytes accepted by `send` but not yet handed to the network.
    /// `None` when the transport exposes no such signal; the engine then sends back-to-back.
    fn buffered_amount(&self) -> Option<usize> {
        None
    }

    fn close(&mut self);
}

/// Connection lifecycle as seen by the engine. Messages are dispatched only while `Open`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
}

impl ChannelState {
    /// Whether `self -> next` is a legal transition. `Closed` is terminal.
    pub fn can_transition_to(self, next: ChannelState) -> bool {
        use ChannelState::*;
        matches!(
            (self, next),
            (Idle, Connecting) | (Idle, Open) | (Connecting, Open) | (Idle | Connecting | Open, Closed)
        )
    }
}

/// In-memory channel: records every sent message in an outbox the host (or a test) drains.
/// Optionally reports its outbox size as the buffered amount, and can inject send failures.
#[derive(Debug)]
pub struct MemoryChannel {
    open: bool,
    outbox: VecDeque<Vec<u8>>,
    buffered: usize,
    track_buffer: bool,
    fail_after: Option<usize>,
    sent_count: usize,
}

impl MemoryChannel {
    /// Open channel without a buffered-amount signal.
    pub fn new() -> Self {
        Self {
            open: true,
            outbox: VecDeque::new(),
            buffered: 0,
            track_buffer: false,
            fail_after: None,
            sent_count: 0,
        }
    }

    /// Open channel that reports undrained outbox bytes as its buffered amount.
    pub fn with_buffer_tracking() -> Self {
        Self {
            track_buffer: true,
            ..Self::new()
        }
    }

    /// Accept `n` messages, then fail every further send.
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Remove and return everything sent so far.
    pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
        self.buffered = 0;
        self.outbox.drain(..).collect()
    }

    /// Remove and return up to `n` of the oldest sent messages.
    pub fn drain(&mut self, n: usize) -> Vec<Vec<u8>> {
        let n = n.min(self.outbox.len());
        let out: Vec<Vec<u8>> = self.outbox.drain(..n).collect();
        self.buffered -= out.iter().map(Vec::len).sum::<usize>();
        out
    }

    /// Messages sent and not yet drained.
    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    /// Total successful sends over the channel's lifetime.
    pub fn sent_count(&self) -> usize {
        self.sent_count
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for MemoryChannel {
    fn send(&mut self, message: &[u8]) -> Result<(), ChannelError> {
        if !self.open {
            return Err(ChannelError::NotOpen);
        }
        if self.fail_after.is_some_and(|n| self.sent_count >= n) {
            return Err(ChannelError::SendFailed("injected failure".into()));
        }
        self.sent_count += 1;
        self.buffered += message.len();
        self.outbox.push_back(message.to_vec());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn buffered_amount(&self) -> Option<usize> {
        self.track_buffer.then_some(self.buffered)
    }

    fn close(&mut self) {
        self.open = false;
    }
}
