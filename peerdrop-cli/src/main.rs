// peerdrop: send files and short messages to a peer over TCP, or listen for them.

mod config;
mod peer;
mod sink;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const USAGE: &str = "usage:
  peerdrop listen [port]
  peerdrop send <addr> <file> [mime-type]
  peerdrop text <addr> <message>
  peerdrop --version";
const DEFAULT_MIME: &str = "application/octet-stream";

#[derive(Debug, PartialEq)]
enum Command {
    Version,
    Listen { port: Option<u16> },
    Send { addr: String, path: PathBuf, mime_type: String },
    Text { addr: String, message: String },
}

fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    if args.iter().any(|a| a == "--version" || a == "-V") {
        return Ok(Command::Version);
    }
    let rest: Vec<&str> = args.iter().map(String::as_str).collect();
    match rest.as_slice() {
        ["listen"] => Ok(Command::Listen { port: None }),
        ["listen", port] => Ok(Command::Listen {
            port: Some(port.parse().with_context(|| format!("bad port {:?}", port))?),
        }),
        ["send", addr, path] | ["send", addr, path, _] => Ok(Command::Send {
            addr: addr.to_string(),
            path: PathBuf::from(path),
            mime_type: rest.get(3).copied().unwrap_or(DEFAULT_MIME).to_string(),
        }),
        ["text", addr, words @ ..] if !words.is_empty() => Ok(Command::Text {
            addr: addr.to_string(),
            message: words.join(" "),
        }),
        _ => bail!("{}", USAGE),
    }
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;
    if command == Command::Version {
        println!("peerdrop {}", VERSION);
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = config::load();
    cfg.engine.validate().context("invalid engine configuration")?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        match command {
            Command::Version => Ok(()),
            Command::Listen { port } => {
                let port = port.unwrap_or(cfg.port);
                tokio::select! {
                    r = peer::listen(Arc::new(cfg), port) => r,
                    r = shutdown_signal() => {
                        tracing::info!("shutting down");
                        r
                    }
                }
            }
            Command::Send {
                addr,
                path,
                mime_type,
            } => peer::send_file(&cfg, &addr, &path, &mime_type).await,
            Command::Text { addr, message } => peer::send_text(&cfg, &addr, &message).await,
        }
    })
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_args(&args("-V")).unwrap(), Command::Version);
        assert_eq!(
            parse_args(&args("listen")).unwrap(),
            Command::Listen { port: None }
        );
        assert_eq!(
            parse_args(&args("listen 9000")).unwrap(),
            Command::Listen { port: Some(9000) }
        );
        assert_eq!(
            parse_args(&args("send 10.0.0.2:45680 a.png image/png")).unwrap(),
            Command::Send {
                addr: "10.0.0.2:45680".into(),
                path: PathBuf::from("a.png"),
                mime_type: "image/png".into(),
            }
        );
        assert_eq!(
            parse_args(&args("text host:1 hello there")).unwrap(),
            Command::Text {
                addr: "host:1".into(),
                message: "hello there".into(),
            }
        );
    }

    #[test]
    fn send_defaults_mime_type() {
        match parse_args(&args("send host:1 a.bin")).unwrap() {
            Command::Send { mime_type, .. } => assert_eq!(mime_type, DEFAULT_MIME),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_bad_usage() {
        assert!(parse_args(&args("")).is_err());
        assert!(parse_args(&args("listen notaport")).is_err());
        assert!(parse_args(&args("text host:1")).is_err());
        assert!(parse_args(&args("send host:1")).is_err());
    }
}
