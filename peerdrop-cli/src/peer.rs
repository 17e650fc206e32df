//! The three commands: accept transfers, send a file, send a text message.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use peerdrop_core::{
    dispatch_all, ChannelError, OutgoingFile, SessionRegistry, TransferEngine, TransferHandle,
    TransferSession,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::sink::Reporter;
use crate::transport::{self, FrameReader, TcpChannel};

type Frame = std::io::Result<Option<Vec<u8>>>;

/// Accept connections on `port` until the task is dropped.
pub async fn listen(cfg: Arc<Config>, port: u16) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&cfg.out_dir)
        .await
        .with_context(|| format!("create {}", cfg.out_dir.display()))?;
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("bind port {}", port))?;
    info!(
        "listening on {}, saving to {}",
        listener.local_addr()?,
        cfg.out_dir.display()
    );
    serve(listener, cfg).await
}

/// One task owns every inbound session; reader tasks forward frames to it.
async fn serve(listener: TcpListener, cfg: Arc<Config>) -> anyhow::Result<()> {
    let (frames, mut inbox) = mpsc::unbounded_channel();
    let mut hub = Hub {
        registry: SessionRegistry::new(cfg.engine.clone())?,
        cfg,
        inbound: HashMap::new(),
        next_conn: 0,
        frames,
    };
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                hub.accept(stream, addr);
            }
            Some((ip, conn, frame)) = inbox.recv() => {
                if let Err(e) = hub.on_frame(ip, conn, frame).await {
                    warn!("{}: saving failed: {}", ip, e);
                }
            }
        }
    }
}

/// Reader side of one live inbound connection.
struct Inbound {
    conn: u64,
    reader: JoinHandle<()>,
    reporter: Reporter,
}

/// Inbound sessions keyed by peer address. A new connection from an address closes the
/// previous one and aborts whatever it was still receiving.
struct Hub {
    cfg: Arc<Config>,
    registry: SessionRegistry<IpAddr, TcpChannel>,
    inbound: HashMap<IpAddr, Inbound>,
    next_conn: u64,
    frames: mpsc::UnboundedSender<(IpAddr, u64, Frame)>,
}

impl Hub {
    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        let ip = addr.ip();
        self.drop_peer(ip, "replaced by a new connection");

        let conn = transport::split(stream, self.cfg.engine.low_water_mark);
        self.next_conn += 1;
        let mut reporter = Reporter::new(addr.to_string());
        dispatch_all(self.registry.connect(ip, conn.channel), &mut reporter);
        if let Some(session) = self.registry.get_mut(&ip) {
            session.open();
        }
        let reader = tokio::spawn(forward_frames(
            ip,
            self.next_conn,
            conn.reader,
            self.frames.clone(),
        ));
        self.inbound.insert(
            ip,
            Inbound {
                conn: self.next_conn,
                reader,
                reporter,
            },
        );
        info!("{}: connected", addr);
    }

    /// Close the session for `ip`, if any. Its writer task drains and exits on its own.
    fn drop_peer(&mut self, ip: IpAddr, why: &str) {
        if let Some(mut old) = self.inbound.remove(&ip) {
            old.reader.abort();
            dispatch_all(self.registry.disconnect(&ip), &mut old.reporter);
            info!("{}: {}", ip, why);
        }
    }

    async fn on_frame(&mut self, ip: IpAddr, conn: u64, frame: Frame) -> std::io::Result<()> {
        let (Some(entry), Some(session)) = (self.inbound.get_mut(&ip), self.registry.get_mut(&ip))
        else {
            return Ok(());
        };
        // Late frame from a connection that was since replaced.
        if entry.conn != conn {
            return Ok(());
        }
        let (events, finished) = match frame {
            Ok(Some(bytes)) => match session.on_message(&bytes) {
                Ok(events) => (events, false),
                Err(e) => {
                    warn!("{}: dropping message: {}", ip, e);
                    (Vec::new(), false)
                }
            },
            Ok(None) => (session.on_remote_close(), true),
            Err(e) => (session.on_error(ChannelError::Transport(e.to_string())), true),
        };
        dispatch_all(events, &mut entry.reporter);
        let saved = entry.reporter.save_completed(&self.cfg.out_dir).await;
        if finished {
            self.drop_peer(ip, "disconnected");
        }
        saved.map(|_| ())
    }
}

/// Forward every frame of one connection, ending after EOF or the first error.
async fn forward_frames(
    ip: IpAddr,
    conn: u64,
    mut reader: FrameReader,
    frames: mpsc::UnboundedSender<(IpAddr, u64, Frame)>,
) {
    loop {
        let frame = reader.next_frame().await;
        let last = !matches!(frame, Ok(Some(_)));
        if frames.send((ip, conn, frame)).is_err() || last {
            return;
        }
    }
}

/// Send one file and wait until every chunk is on the wire.
pub async fn send_file(cfg: &Config, addr: &str, path: &Path, mime_type: &str) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());

    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connect {}", addr))?;
    let transport::Connection {
        channel,
        mut reader,
        drained,
        writer,
    } = transport::split(stream, cfg.engine.low_water_mark);
    let mut session = open_session(channel, cfg)?;
    let mut reporter = Reporter::new(addr);

    info!("sending {} ({} bytes) to {}", name, bytes.len(), addr);
    let (handle, events) = session.send_file(OutgoingFile::new(name.as_str(), mime_type, bytes))?;
    dispatch_all(events, &mut reporter);
    drive_send(&mut session, &mut reader, &drained, &mut reporter, &handle).await?;

    let (_, events) = session.close();
    dispatch_all(events, &mut reporter);
    writer.await??;
    if reporter.failures() > 0 {
        bail!("sending {} failed", name);
    }
    Ok(())
}

/// Send one text message and close.
pub async fn send_text(cfg: &Config, addr: &str, message: &str) -> anyhow::Result<()> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connect {}", addr))?;
    let conn = transport::split(stream, cfg.engine.low_water_mark);
    let mut session = open_session(conn.channel, cfg)?;
    session.send_text(message)?;
    session.close();
    conn.writer.await??;
    info!("sent message to {}", addr);
    Ok(())
}

fn open_session(channel: TcpChannel, cfg: &Config) -> anyhow::Result<TransferSession<TcpChannel>> {
    let engine = TransferEngine::with_config(cfg.engine.clone())?;
    let mut session = TransferSession::new(channel, engine);
    session.open();
    Ok(session)
}

/// Pump on every drain notification until no send is left. Ctrl+C cancels the transfer.
async fn drive_send(
    session: &mut TransferSession<TcpChannel>,
    reader: &mut FrameReader,
    drained: &Notify,
    reporter: &mut Reporter,
    handle: &TransferHandle,
) -> anyhow::Result<()> {
    while session.engine().active_sends() > 0 {
        let events = tokio::select! {
            _ = drained.notified() => session.pump(),
            frame = reader.next_frame() => match frame {
                Ok(Some(bytes)) => match session.on_message(&bytes) {
                    Ok(events) => events,
                    Err(e) => {
                        warn!("dropping message: {}", e);
                        Vec::new()
                    }
                },
                Ok(None) => {
                    dispatch_all(session.on_remote_close(), reporter);
                    return Ok(());
                }
                Err(e) => {
                    let events = session.on_error(ChannelError::Transport(e.to_string()));
                    dispatch_all(events, reporter);
                    return Err(e.into());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("cancelling {}", handle.id());
                handle.cancel();
                session.pump()
            }
        };
        dispatch_all(events, reporter);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerdrop_core::wire::encode_message;
    use peerdrop_core::{Channel, Message, TransferId};
    use std::time::Duration;

    fn test_config(out_dir: &Path) -> Config {
        let mut cfg = Config::default();
        cfg.out_dir = out_dir.to_path_buf();
        cfg.engine.chunk_size = 1000;
        cfg.engine.high_water_mark = 4096;
        cfg.engine.low_water_mark = 1024;
        cfg
    }

    async fn temp_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("peerdrop-{}-{}", tag, TransferId::generate()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        dir
    }

    async fn start_server(cfg: Arc<Config>) -> (SocketAddr, JoinHandle<anyhow::Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (addr, tokio::spawn(serve(listener, cfg)))
    }

    #[tokio::test]
    async fn file_crosses_a_real_socket() {
        let dir = temp_dir("peer").await;
        let cfg = Arc::new(test_config(&dir));
        let (addr, server) = start_server(cfg.clone()).await;

        let src = dir.join("outgoing.dat");
        let body: Vec<u8> = (0..25_000u32).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&src, &body).await.unwrap();
        send_file(&cfg, &addr.to_string(), &src, "application/octet-stream")
            .await
            .unwrap();

        // Sent from inside the output directory, so the received copy gets a suffix.
        let received = dir.join("outgoing-1.dat");
        tokio::time::timeout(Duration::from_secs(5), async {
            while tokio::fs::metadata(&received).await.ok().map(|m| m.len()) != Some(body.len() as u64) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(tokio::fs::read(&received).await.unwrap(), body);

        server.abort();
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn reconnect_from_same_peer_closes_the_first_connection() {
        let dir = temp_dir("reconnect").await;
        let cfg = Arc::new(test_config(&dir));
        let (addr, server) = start_server(cfg.clone()).await;

        let mut first = transport::split(TcpStream::connect(addr).await.unwrap(), 0);
        let header = Message::Header {
            transfer_id: TransferId::generate(),
            name: "half.bin".into(),
            mime_type: String::new(),
            total_size: 5000,
            total_chunks: 5,
        };
        first
            .channel
            .send(&encode_message(&header, usize::MAX).unwrap())
            .unwrap();

        let second = transport::split(TcpStream::connect(addr).await.unwrap(), 0);
        let eof = tokio::time::timeout(Duration::from_secs(5), first.reader.next_frame())
            .await
            .unwrap()
            .unwrap();
        assert!(eof.is_none());
        assert!(second.channel.is_open());

        server.abort();
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
