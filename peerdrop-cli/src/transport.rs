//! TCP transport: one length-prefixed frame per engine message, written by a per-connection task.
//! The engine sees a `Channel` whose buffered amount is the bytes queued but not yet written.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use peerdrop_core::wire::{decode_frame, encode_frame, DecodeError};
use peerdrop_core::{Channel, ChannelError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

const READ_RESERVE: usize = 64 * 1024;

/// Sending half of a connection, handed to the engine.
pub struct TcpChannel {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    buffered: Arc<AtomicUsize>,
    open: Arc<AtomicBool>,
}

impl Channel for TcpChannel {
    fn send(&mut self, message: &[u8]) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::NotOpen);
        }
        let frame = encode_frame(message).map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        let len = frame.len();
        let tx = self.tx.as_ref().ok_or(ChannelError::NotOpen)?;
        self.buffered.fetch_add(len, Ordering::AcqRel);
        if tx.send(frame).is_err() {
            self.buffered.fetch_sub(len, Ordering::AcqRel);
            self.open.store(false, Ordering::Release);
            return Err(ChannelError::SendFailed("writer task gone".into()));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.tx.is_some() && self.open.load(Ordering::Acquire)
    }

    fn buffered_amount(&self) -> Option<usize> {
        Some(self.buffered.load(Ordering::Acquire))
    }

    /// Stop accepting sends. Frames already queued are still written before the socket shuts down.
    fn close(&mut self) {
        self.tx = None;
    }
}

/// Receiving half of a connection. Bytes read but not yet framed stay buffered, so a
/// `next_frame` future dropped in a `select!` loses nothing.
pub struct FrameReader {
    inner: OwnedReadHalf,
    buf: Vec<u8>,
}

impl FrameReader {
    /// Next whole frame, or `None` when the peer closed cleanly between frames.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            match decode_frame(&self.buf) {
                Ok((message, consumed)) => {
                    let message = message.to_vec();
                    self.buf.drain(..consumed);
                    return Ok(Some(message));
                }
                Err(DecodeError::NeedMore) => {}
                Err(e) => {
                    return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e));
                }
            }
            self.buf.reserve(READ_RESERVE);
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-frame",
                ));
            }
        }
    }
}

/// A split connection. `drained` fires whenever the write queue falls to or below the low
/// water mark, and when the writer fails.
pub struct Connection {
    pub channel: TcpChannel,
    pub reader: FrameReader,
    pub drained: Arc<Notify>,
    pub writer: JoinHandle<std::io::Result<()>>,
}

/// Split `stream` and spawn its writer task.
pub fn split(stream: TcpStream, low_water_mark: usize) -> Connection {
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let buffered = Arc::new(AtomicUsize::new(0));
    let open = Arc::new(AtomicBool::new(true));
    let drained = Arc::new(Notify::new());

    let writer_buffered = buffered.clone();
    let writer_open = open.clone();
    let writer_drained = drained.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write_half.write_all(&frame).await {
                debug!("write failed: {}", e);
                writer_open.store(false, Ordering::Release);
                writer_drained.notify_one();
                return Err(e);
            }
            let left = writer_buffered.fetch_sub(frame.len(), Ordering::AcqRel) - frame.len();
            if left <= low_water_mark {
                writer_drained.notify_one();
            }
        }
        match write_half.shutdown().await {
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            r => r,
        }
    });

    Connection {
        channel: TcpChannel {
            tx: Some(tx),
            buffered,
            open,
        },
        reader: FrameReader {
            inner: read_half,
            buf: Vec::new(),
        },
        drained,
        writer,
    }
}
