//! Turns engine events into log lines and files on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use peerdrop_core::{Direction, ErrorKind, FileDescriptor, TransferId, TransferObserver};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const FALLBACK_NAME: &str = "received.bin";

/// Observer for one connection. Completed inbound files are queued until `save_completed`.
pub struct Reporter {
    peer: String,
    completed: Vec<(FileDescriptor, Vec<u8>)>,
    progress: HashMap<TransferId, u64>,
    failures: usize,
}

impl Reporter {
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            completed: Vec::new(),
            progress: HashMap::new(),
            failures: 0,
        }
    }

    /// Transfers that ended in an error since this reporter was created.
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Write every queued file into `dir`. Returns the paths written.
    pub async fn save_completed(&mut self, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for (descriptor, bytes) in self.completed.drain(..) {
            let path = write_new_file(dir, &safe_file_name(&descriptor.name), &bytes).await?;
            info!(
                "{}: saved {} ({} bytes, {})",
                self.peer,
                path.display(),
                bytes.len(),
                if descriptor.mime_type.is_empty() {
                    "no type"
                } else {
                    descriptor.mime_type.as_str()
                }
            );
            written.push(path);
        }
        Ok(written)
    }
}

impl TransferObserver for Reporter {
    fn on_header(&mut self, descriptor: &FileDescriptor) {
        info!(
            "{}: receiving {:?} ({} bytes in {} chunks)",
            self.peer, descriptor.name, descriptor.total_size, descriptor.total_chunks
        );
    }

    fn on_progress(&mut self, id: &TransferId, direction: Direction, done: u64, total: u64) {
        let percent = if total == 0 { 100 } else { done * 100 / total };
        let decile = percent / 10;
        if self.progress.insert(id.clone(), decile) != Some(decile) {
            debug!("{}: {} {:?} {}%", self.peer, id, direction, percent);
        }
    }

    fn on_sent(&mut self, id: &TransferId) {
        self.progress.remove(id);
        info!("{}: sent {}", self.peer, id);
    }

    fn on_complete(&mut self, id: &TransferId, bytes: Vec<u8>, descriptor: &FileDescriptor) {
        self.progress.remove(id);
        self.completed.push((descriptor.clone(), bytes));
    }

    fn on_text(&mut self, payload: &str) {
        info!("{}: message: {}", self.peer, payload);
    }

    fn on_error(&mut self, id: &TransferId, kind: &ErrorKind) {
        self.progress.remove(id);
        self.failures += 1;
        warn!("{}: transfer {} failed: {}", self.peer, id, kind);
    }
}

/// Final path component of a peer-supplied name, with either separator style stripped.
pub fn safe_file_name(name: &str) -> String {
    let last = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches('\0');
    match last {
        "" | "." | ".." => FALLBACK_NAME.to_string(),
        s => s.to_string(),
    }
}

/// `name`, then `stem-1.ext`, `stem-2.ext`, ...
fn candidate(name: &str, n: usize) -> String {
    if n == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, n, ext),
        _ => format!("{}-{}", name, n),
    }
}

/// Create a file that did not exist before. Existing files are never overwritten.
async fn write_new_file(dir: &Path, name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    let mut n = 0;
    loop {
        let path = dir.join(candidate(name, n));
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                file.write_all(bytes).await?;
                file.flush().await?;
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}
