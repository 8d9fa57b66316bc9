use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::ColdCfg;
use crate::metrics::LogMetrics;
use crate::model::LogEntry;

const FRAME_BYTES: usize = 64 * 1024;

/// Cloneable handle; the writer thread shuts down when the last clone is dropped.
#[derive(Clone)]
pub struct ColdWriterHandle {
    inner: Arc<HandleInner>,
    metrics: LogMetrics,
}

struct HandleInner {
    tx: Sender<Command>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

enum Command {
    Append(Box<LogEntry>),
    Flush(mpsc::Sender<io::Result<()>>),
    Shutdown,
}

impl ColdWriterHandle {
    pub fn append(&self, entry: LogEntry) -> io::Result<()> {
        self.inner
            .tx
            .send(Command::Append(Box::new(entry)))
            .map_err(|err| io::Error::new(io::ErrorKind::BrokenPipe, err.to_string()))?;
        self.metrics.cold_queue_inc();
        Ok(())
    }

    pub fn flush(&self) -> io::Result<()> {
        let (tx, rx) = mpsc::channel();
        self.inner
            .tx
            .send(Command::Flush(tx))
            .map_err(|err| io::Error::new(io::ErrorKind::BrokenPipe, err.to_string()))?;
        rx.recv()
            .unwrap_or_else(|err| Err(io::Error::new(io::ErrorKind::Other, err.to_string())))
    }
}

pub fn spawn(cfg: ColdCfg, metrics: LogMetrics) -> Option<ColdWriterHandle> {
    if !cfg.enabled {
        return None;
    }
    let (tx, rx) = mpsc::channel();
    let mut state = ColdWriterState::new(cfg, metrics.clone());
    if thread::Builder::new()
        .name("inference-log-cold".into())
        .spawn(move || {
            while let Ok(cmd) = rx.recv() {
                match cmd {
                    Command::Append(entry) => {
                        if let Err(err) = state.append(&entry) {
                            warn!(error = %err, "cold append failed");
                            state.metrics.record_cold_error();
                        }
                        state.metrics.cold_queue_dec();
                    }
                    Command::Flush(reply) => {
                        let _ = reply.send(state.flush());
                    }
                    Command::Shutdown => {
                        if let Err(err) = state.flush() {
                            warn!(error = %err, "cold flush on shutdown failed");
                        }
                        break;
                    }
                }
            }
        })
        .is_err()
    {
        return None;
    }
    Some(ColdWriterHandle {
        inner: Arc::new(HandleInner { tx }),
        metrics,
    })
}

/// Lines are buffered and written out as whole frames, so a compressed file is a valid
/// concatenation of zstd frames at every flush boundary.
struct ColdWriterState {
    cfg: ColdCfg,
    file: Option<File>,
    current_path: Option<PathBuf>,
    pending: Vec<u8>,
    bytes_written: u64,
    sequence: u64,
    metrics: LogMetrics,
}

impl ColdWriterState {
    fn new(cfg: ColdCfg, metrics: LogMetrics) -> Self {
        Self {
            cfg,
            file: None,
            current_path: None,
            pending: Vec::with_capacity(FRAME_BYTES),
            bytes_written: 0,
            sequence: 0,
            metrics,
        }
    }

    fn append(&mut self, entry: &LogEntry) -> io::Result<()> {
        let line = serde_json::to_vec(entry)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
        self.pending.extend_from_slice(&line);
        self.pending.push(b'\n');
        if self.pending.len() >= FRAME_BYTES {
            self.write_frame()?;
        }
        Ok(())
    }

    fn write_frame(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rotate_by_size =
            self.cfg.rotate_bytes > 0 && self.bytes_written >= self.cfg.rotate_bytes;
        if self.file.is_none() || rotate_by_size {
            self.rotate(Utc::now())?;
        }
        let frame = if self.cfg.compress {
            zstd::encode_all(self.pending.as_slice(), 3)?
        } else {
            std::mem::take(&mut self.pending)
        };
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "cold file not open"))?;
        file.write_all(&frame)?;
        self.bytes_written += frame.len() as u64;
        self.pending.clear();
        Ok(())
    }

    fn rotate(&mut self, ts: DateTime<Utc>) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.sync_all()?;
        }
        self.file = None;
        self.bytes_written = 0;
        self.sequence = self.sequence.wrapping_add(1);
        let path = self.build_path(ts);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.file = Some(file);
        self.current_path = Some(path);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.write_frame()?;
        if let Some(file) = self.file.as_mut() {
            file.sync_all()?;
        }
        Ok(())
    }

    fn build_path(&self, ts: DateTime<Utc>) -> PathBuf {
        let mut path = self.cfg.root.clone();
        path.push(ts.format("%Y%m%d").to_string());
        let mut file = format!(
            "log-{}-{:04}.jsonl",
            ts.format("%Y%m%dT%H%M%S"),
            self.sequence
        );
        if self.cfg.compress {
            file.push_str(".zst");
        }
        path.push(file);
        path
    }
}
