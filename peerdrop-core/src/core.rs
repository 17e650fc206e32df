//! Host-driven API: TransferEngine receives channel events from the host, returns events.
//! The host owns the channel and lends it to each call; the engine never blocks.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::channel::{Channel, ChannelError, ChannelState};
use crate::chunk::{ChunkReceiveResult, FileDescriptor, InProgressReceive};
use crate::config::{ConfigError, EngineConfig};
use crate::error::{AbortReason, ErrorKind, MessageError};
use crate::event::Event;
use crate::flow::FlowGate;
use crate::protocol::{Message, TransferId};
use crate::sender::{OutgoingFile, OutgoingTransfer, TransferHandle};
use crate::wire::{self, EncodeError};

/// Inbound ids remembered as retired per engine. The oldest are forgotten first.
const RETIRED_CAPACITY: usize = 4096;

/// Insertion-ordered set of retired inbound ids with a fixed capacity.
#[derive(Debug)]
struct RetiredIds {
    capacity: usize,
    order: VecDeque<TransferId>,
    ids: HashSet<TransferId>,
}

impl RetiredIds {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            ids: HashSet::new(),
        }
    }

    fn insert(&mut self, id: TransferId) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn contains(&self, id: &TransferId) -> bool {
        self.ids.contains(id)
    }
}

/// Chunked transfer engine for one channel.
pub struct TransferEngine {
    config: EngineConfig,
    state: ChannelState,
    /// Outbound transfers in start order; only the front one is emitting.
    outgoing: VecDeque<OutgoingTransfer>,
    incoming: HashMap<TransferId, InProgressReceive>,
    /// Inbound ids that completed or were abandoned. A header may not reuse one.
    retired: RetiredIds,
    gate: FlowGate,
}

impl TransferEngine {
    /// Engine with the default configuration.
    pub fn new() -> Self {
        Self::from_validated(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    pub(crate) fn from_validated(config: EngineConfig) -> Self {
        let gate = FlowGate::new(config.high_water_mark, config.low_water_mark);
        Self {
            config,
            state: ChannelState::Idle,
            outgoing: VecDeque::new(),
            incoming: HashMap::new(),
            retired: RetiredIds::with_capacity(RETIRED_CAPACITY),
            gate,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Outbound transfers not yet finished, cancelled or aborted.
    pub fn active_sends(&self) -> usize {
        self.outgoing.len()
    }

    /// Inbound transfers awaiting more chunks.
    pub fn active_receives(&self) -> usize {
        self.incoming.len()
    }

    /// Whether emission is held back by backpressure.
    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    fn transition(&mut self, next: ChannelState) -> bool {
        if !self.state.can_transition_to(next) {
            debug!(from = ?self.state, to = ?next, "ignoring channel state change");
            return false;
        }
        debug!(from = ?self.state, to = ?next, "channel state");
        self.state = next;
        true
    }

    /// Host started connecting.
    pub fn on_connecting(&mut self) {
        self.transition(ChannelState::Connecting);
    }

    /// Channel reported open. Messages are dispatched from now on.
    pub fn on_open(&mut self) {
        self.transition(ChannelState::Open);
    }

    /// Channel closed. Every transfer still in flight, either direction, is aborted;
    /// partial inbound data is discarded.
    pub fn on_close(&mut self) -> Vec<Event> {
        if !self.transition(ChannelState::Closed) {
            return Vec::new();
        }
        self.abort_all(|last_index| ErrorKind::TransferAborted {
            last_index,
            reason: AbortReason::ChannelClosed,
        })
    }

    /// Channel reported a transport error. Treated as fatal: the channel is considered
    /// closed and every transfer is aborted with the error as its reason.
    pub fn on_error(&mut self, error: ChannelError) -> Vec<Event> {
        warn!(%error, "channel error");
        if !self.transition(ChannelState::Closed) {
            return Vec::new();
        }
        self.abort_all(|last_index| ErrorKind::TransferAborted {
            last_index,
            reason: AbortReason::ChannelError(error.clone()),
        })
    }

    fn abort_all(&mut self, kind: impl Fn(Option<u64>) -> ErrorKind) -> Vec<Event> {
        let mut events = Vec::new();
        let mut pending: Vec<(TransferId, InProgressReceive)> = self.incoming.drain().collect();
        pending.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, receive) in pending {
            debug!(transfer_id = %id, received = receive.received_count(), "discarding partial receive");
            events.push(Event::TransferError {
                kind: kind(receive.last_index()),
                transfer_id: id.clone(),
            });
            self.retired.insert(id);
        }
        for transfer in self.outgoing.drain(..) {
            events.push(Event::TransferError {
                transfer_id: transfer.id().clone(),
                kind: kind(transfer.last_sent()),
            });
        }
        events
    }

    fn ensure_open<C: Channel + ?Sized>(&self, channel: &C) -> Result<(), ErrorKind> {
        if self.state != ChannelState::Open || !channel.is_open() {
            return Err(ErrorKind::Channel(ChannelError::NotOpen));
        }
        Ok(())
    }

    fn send_message<C: Channel + ?Sized>(
        &self,
        channel: &mut C,
        msg: &Message,
    ) -> Result<(), ChannelError> {
        send_encoded(channel, msg, self.config.max_message_len)
    }

    /// Best-effort notice to the peer that we dropped `transfer_id`.
    fn send_abort<C: Channel + ?Sized>(&self, channel: &mut C, transfer_id: &TransferId) {
        let msg = Message::Abort {
            transfer_id: transfer_id.clone(),
        };
        if let Err(error) = self.send_message(channel, &msg) {
            debug!(%transfer_id, %error, "could not notify peer of abort");
        }
    }

    /// Queue a file for sending. Nothing is emitted until `pump`.
    pub fn start_send<C: Channel + ?Sized>(
        &mut self,
        channel: &C,
        file: OutgoingFile,
    ) -> Result<TransferHandle, ErrorKind> {
        self.ensure_open(channel)?;
        let transfer = OutgoingTransfer::new(file, self.config.chunk_size);
        let handle = transfer.handle();
        let d = transfer.descriptor();
        debug!(
            transfer_id = %d.id,
            name = %d.name,
            total_size = d.total_size,
            total_chunks = d.total_chunks,
            "send queued"
        );
        self.outgoing.push_back(transfer);
        Ok(handle)
    }

    /// Emit as many queued messages as backpressure allows. Call again after the channel's
    /// buffered amount drops (see `on_buffered_amount_low`) to resume a paused transfer.
    pub fn pump<C: Channel + ?Sized>(&mut self, channel: &mut C) -> Vec<Event> {
        let mut events = Vec::new();
        self.reap_cancelled(channel, &mut events);
        if self.state != ChannelState::Open {
            return events;
        }
        while let Some(transfer) = self.outgoing.front_mut() {
            if !self.gate.may_send(channel.buffered_amount()) {
                debug!(buffered = ?channel.buffered_amount(), "send paused by backpressure");
                break;
            }
            let Some(msg) = transfer.next() else {
                break;
            };
            match send_encoded(channel, &msg, self.config.max_message_len) {
                Ok(()) => {
                    transfer.confirm_sent(&msg);
                    if let Message::Chunk { index, .. } = msg {
                        events.push(Event::ChunkSent {
                            transfer_id: transfer.id().clone(),
                            index,
                            bytes_done: transfer.bytes_sent(),
                            total_bytes: transfer.descriptor().total_size,
                        });
                    }
                    if transfer.is_finished() {
                        let id = transfer.id().clone();
                        debug!(transfer_id = %id, "send finished");
                        self.outgoing.pop_front();
                        events.push(Event::SendFinished { transfer_id: id });
                    }
                }
                Err(error) => {
                    let last_index = transfer.last_sent();
                    let id = transfer.id().clone();
                    warn!(transfer_id = %id, %error, ?last_index, "send failed, aborting transfer");
                    self.outgoing.pop_front();
                    events.push(Event::TransferError {
                        transfer_id: id,
                        kind: ErrorKind::TransferAborted {
                            last_index,
                            reason: AbortReason::SendFailed(error),
                        },
                    });
                }
            }
        }
        events
    }

    /// Channel drained below its low threshold: resume emission.
    pub fn on_buffered_amount_low<C: Channel + ?Sized>(&mut self, channel: &mut C) -> Vec<Event> {
        self.pump(channel)
    }

    fn reap_cancelled<C: Channel + ?Sized>(&mut self, channel: &mut C, events: &mut Vec<Event>) {
        let (cancelled, kept): (Vec<_>, Vec<_>) = self
            .outgoing
            .drain(..)
            .partition(|t| t.handle().is_cancelled());
        self.outgoing = kept.into();
        for transfer in cancelled {
            debug!(transfer_id = %transfer.id(), "send cancelled");
            if transfer.has_started() && self.state == ChannelState::Open {
                self.send_abort(channel, transfer.id());
            }
            events.push(Event::TransferError {
                transfer_id: transfer.id().clone(),
                kind: ErrorKind::TransferAborted {
                    last_index: transfer.last_sent(),
                    reason: AbortReason::Cancelled,
                },
            });
        }
    }

    /// Send a text message. Never chunked, so it is bounded by the message size limit.
    pub fn send_text<C: Channel + ?Sized>(&mut self, channel: &mut C, text: &str) -> Result<(), ErrorKind> {
        self.ensure_open(channel)?;
        let msg = Message::Text {
            payload: text.to_owned(),
        };
        self.send_message(channel, &msg)?;
        Ok(())
    }

    /// Abandon an inbound transfer and tell the sender to stop.
    pub fn cancel_receive<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        transfer_id: &TransferId,
    ) -> Result<Vec<Event>, ErrorKind> {
        let receive = self
            .incoming
            .remove(transfer_id)
            .ok_or(ErrorKind::UnknownTransfer)?;
        self.retired.insert(transfer_id.clone());
        debug!(%transfer_id, "receive cancelled");
        if self.state == ChannelState::Open {
            self.send_abort(channel, transfer_id);
        }
        Ok(vec![Event::TransferError {
            transfer_id: transfer_id.clone(),
            kind: ErrorKind::TransferAborted {
                last_index: receive.last_index(),
                reason: AbortReason::Cancelled,
            },
        }])
    }

    /// Process one message received on the channel. Yields at most one event.
    /// `Err` only when the bytes cannot be attributed to any transfer.
    pub fn on_message<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        bytes: &[u8],
    ) -> Result<Vec<Event>, MessageError> {
        if self.state != ChannelState::Open {
            return Err(MessageError::NotOpen);
        }
        let msg = wire::decode_message(bytes, self.config.max_message_len)?;
        debug!(kind = msg.kind(), len = bytes.len(), "message received");
        let event = match msg {
            Message::Header {
                transfer_id,
                name,
                mime_type,
                total_size,
                total_chunks,
            } => self.on_header(
                channel,
                FileDescriptor {
                    id: transfer_id,
                    name,
                    mime_type,
                    total_size,
                    total_chunks,
                },
            ),
            Message::Chunk {
                transfer_id,
                index,
                payload,
                is_last,
                hash,
            } => self.on_chunk(channel, transfer_id, index, &payload, is_last, &hash),
            Message::Text { payload } => Some(Event::TextReceived { payload }),
            Message::Abort { transfer_id } => self.on_abort(transfer_id),
        };
        Ok(event.into_iter().collect())
    }

    fn reject<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        transfer_id: TransferId,
        kind: ErrorKind,
    ) -> Option<Event> {
        warn!(%transfer_id, error = %kind, "abandoning inbound transfer");
        self.incoming.remove(&transfer_id);
        self.send_abort(channel, &transfer_id);
        self.retired.insert(transfer_id.clone());
        Some(Event::TransferError { transfer_id, kind })
    }

    fn on_header<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        descriptor: FileDescriptor,
    ) -> Option<Event> {
        let id = descriptor.id.clone();
        if self.incoming.contains_key(&id) || self.retired.contains(&id) {
            return self.reject(channel, id, ErrorKind::DuplicateTransfer);
        }
        if let Err(kind) = descriptor.check_consistent() {
            return self.reject(channel, id, kind);
        }
        if descriptor.total_size > self.config.max_receive_size {
            let kind = ErrorKind::TooLarge {
                size: descriptor.total_size,
                limit: self.config.max_receive_size,
            };
            return self.reject(channel, id, kind);
        }
        debug!(
            transfer_id = %id,
            name = %descriptor.name,
            total_size = descriptor.total_size,
            total_chunks = descriptor.total_chunks,
            "receive started"
        );
        self.incoming
            .insert(id, InProgressReceive::new(descriptor.clone()));
        Some(Event::HeaderReceived { descriptor })
    }

    fn on_chunk<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        transfer_id: TransferId,
        index: u64,
        payload: &[u8],
        is_last: bool,
        hash: &[u8; 32],
    ) -> Option<Event> {
        let Some(receive) = self.incoming.get_mut(&transfer_id) else {
            warn!(%transfer_id, index, "chunk for unknown transfer");
            return Some(Event::TransferError {
                transfer_id,
                kind: ErrorKind::UnknownTransfer,
            });
        };
        match receive.accept(index, payload, is_last, hash) {
            Ok(ChunkReceiveResult::InProgress) => Some(Event::ChunkReceived {
                transfer_id,
                index,
                bytes_done: receive.received_bytes(),
                total_bytes: receive.descriptor().total_size,
            }),
            Ok(ChunkReceiveResult::Complete(bytes)) => {
                let receive = self.incoming.remove(&transfer_id)?;
                self.retired.insert(transfer_id.clone());
                debug!(%transfer_id, len = bytes.len(), "receive complete");
                Some(Event::TransferComplete {
                    descriptor: receive.descriptor().clone(),
                    bytes,
                })
            }
            Err(kind) => self.reject(channel, transfer_id, kind),
        }
    }

    fn on_abort(&mut self, transfer_id: TransferId) -> Option<Event> {
        let last_index = if let Some(receive) = self.incoming.remove(&transfer_id) {
            self.retired.insert(transfer_id.clone());
            receive.last_index()
        } else if let Some(pos) = self.outgoing.iter().position(|t| *t.id() == transfer_id) {
            self.outgoing.remove(pos)?.last_sent()
        } else {
            debug!(%transfer_id, "abort for unknown transfer ignored");
            return None;
        };
        debug!(%transfer_id, "transfer cancelled by peer");
        Some(Event::TransferError {
            transfer_id,
            kind: ErrorKind::TransferAborted {
                last_index,
                reason: AbortReason::PeerCancelled,
            },
        })
    }
}

fn send_encoded<C: Channel + ?Sized>(
    channel: &mut C,
    msg: &Message,
    max_len: usize,
) -> Result<(), ChannelError> {
    let bytes = wire::encode_message(msg, max_len).map_err(|e| match e {
        EncodeError::TooLarge { len, max } => ChannelError::MessageTooLarge { len, max },
        EncodeError::Encode(e) => ChannelError::SendFailed(e.to_string()),
    })?;
    channel.send(&bytes)
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new()
    }
}
