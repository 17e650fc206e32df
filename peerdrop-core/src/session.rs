//! Sessions: one channel bound to one engine, and a registry of them keyed by peer.
//! Connecting to a peer that already has a session closes the old one first.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use tracing::debug;

use crate::channel::{Channel, ChannelError};
use crate::config::{ConfigError, EngineConfig};
use crate::core::TransferEngine;
use crate::error::{ErrorKind, MessageError};
use crate::event::Event;
use crate::protocol::TransferId;
use crate::sender::{OutgoingFile, TransferHandle};

/// A channel and the engine driving it.
pub struct TransferSession<C: Channel> {
    channel: C,
    engine: TransferEngine,
}

impl<C: Channel> TransferSession<C> {
    /// Session for a channel still being set up. Call `open` once it reports open.
    pub fn new(channel: C, mut engine: TransferEngine) -> Self {
        engine.on_connecting();
        Self { channel, engine }
    }

    pub fn open(&mut self) {
        self.engine.on_open();
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn engine(&self) -> &TransferEngine {
        &self.engine
    }

    /// Start a send and emit as much of it as backpressure allows.
    pub fn send_file(&mut self, file: OutgoingFile) -> Result<(TransferHandle, Vec<Event>), ErrorKind> {
        let handle = self.engine.start_send(&self.channel, file)?;
        let events = self.engine.pump(&mut self.channel);
        Ok((handle, events))
    }

    pub fn send_text(&mut self, text: &str) -> Result<(), ErrorKind> {
        self.engine.send_text(&mut self.channel, text)
    }

    /// Resume emission, e.g. when the channel signals its buffer drained.
    pub fn pump(&mut self) -> Vec<Event> {
        self.engine.pump(&mut self.channel)
    }

    pub fn on_message(&mut self, bytes: &[u8]) -> Result<Vec<Event>, MessageError> {
        self.engine.on_message(&mut self.channel, bytes)
    }

    pub fn cancel_receive(&mut self, transfer_id: &TransferId) -> Result<Vec<Event>, ErrorKind> {
        self.engine.cancel_receive(&mut self.channel, transfer_id)
    }

    /// The remote side closed the channel.
    pub fn on_remote_close(&mut self) -> Vec<Event> {
        self.engine.on_close()
    }

    pub fn on_error(&mut self, error: ChannelError) -> Vec<Event> {
        self.engine.on_error(error)
    }

    /// Close the channel locally. In-flight transfers are aborted.
    pub fn close(mut self) -> (C, Vec<Event>) {
        self.channel.close();
        let events = self.engine.on_close();
        (self.channel, events)
    }
}

/// Live sessions keyed by peer identity. Replaces any single "current connection".
pub struct SessionRegistry<P, C: Channel> {
    config: EngineConfig,
    sessions: HashMap<P, TransferSession<C>>,
}

impl<P, C> SessionRegistry<P, C>
where
    P: Eq + Hash + Clone + Debug,
    C: Channel,
{
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            sessions: HashMap::new(),
        })
    }

    /// Register a new channel for `peer`. A previous session for that peer is closed and
    /// its abort events returned.
    pub fn connect(&mut self, peer: P, channel: C) -> Vec<Event> {
        let events = self.disconnect(&peer);
        debug!(?peer, "session created");
        let engine = TransferEngine::from_validated(self.config.clone());
        self.sessions
            .insert(peer, TransferSession::new(channel, engine));
        events
    }

    pub fn get(&self, peer: &P) -> Option<&TransferSession<C>> {
        self.sessions.get(peer)
    }

    pub fn get_mut(&mut self, peer: &P) -> Option<&mut TransferSession<C>> {
        self.sessions.get_mut(peer)
    }

    /// Close and forget the session for `peer`, if any.
    pub fn disconnect(&mut self, peer: &P) -> Vec<Event> {
        match self.sessions.remove(peer) {
            Some(session) => {
                debug!(?peer, "session closed");
                session.close().1
            }
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn peers(&self) -> impl Iterator<Item = &P> {
        self.sessions.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelState, MemoryChannel};
    use crate::error::AbortReason;

    #[test]
    fn session_lifecycle() {
        let mut session = TransferSession::new(MemoryChannel::new(), TransferEngine::new());
        assert_eq!(session.engine().state(), ChannelState::Connecting);
        assert!(session.send_text("too early").is_err());
        session.open();
        session.send_text("hi").unwrap();
        let (handle, events) = session
            .send_file(OutgoingFile::new("a", "text/plain", b"abc".to_vec()))
            .unwrap();
        assert!(matches!(events.last(), Some(Event::SendFinished { transfer_id }) if transfer_id == handle.id()));
        // text + header + one chunk
        assert_eq!(session.channel().pending(), 3);
        let (channel, events) = session.close();
        assert!(!channel.is_open());
        assert!(events.is_empty());
    }

    #[test]
    fn reconnect_replaces_prior_session() {
        let mut registry: SessionRegistry<&str, MemoryChannel> =
            SessionRegistry::new(EngineConfig::default()).unwrap();
        assert!(registry.connect("peer-a", MemoryChannel::new()).is_empty());

        let session = registry.get_mut(&"peer-a").unwrap();
        session.open();
        // An inbound transfer left half-finished on the first connection.
        let header = crate::wire::encode_message(
            &crate::protocol::Message::Header {
                transfer_id: TransferId::from("t1"),
                name: "f".into(),
                mime_type: "".into(),
                total_size: 10,
                total_chunks: 2,
            },
            usize::MAX,
        )
        .unwrap();
        session.on_message(&header).unwrap();

        let events = registry.connect("peer-a", MemoryChannel::new());
        assert_eq!(
            events,
            vec![Event::TransferError {
                transfer_id: TransferId::from("t1"),
                kind: ErrorKind::TransferAborted {
                    last_index: None,
                    reason: AbortReason::ChannelClosed
                }
            }]
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(&"peer-a").unwrap().engine().state(),
            ChannelState::Connecting
        );
    }

    #[test]
    fn peers_are_independent() {
        let mut registry: SessionRegistry<u32, MemoryChannel> =
            SessionRegistry::new(EngineConfig::default()).unwrap();
        registry.connect(1, MemoryChannel::new());
        registry.connect(2, MemoryChannel::new());
        assert_eq!(registry.len(), 2);
        registry.disconnect(&1);
        assert!(registry.get(&1).is_none());
        assert_eq!(registry.peers().collect::<Vec<_>>(), vec![&2]);
        registry.disconnect(&2);
        assert!(registry.is_empty());
    }

    #[test]
    fn invalid_config_rejected() {
        let cfg = EngineConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(SessionRegistry::<u32, MemoryChannel>::new(cfg).is_err());
    }
}
