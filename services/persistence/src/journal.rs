//! Message log: append-only, one JSON line per message
//!
//! # Line format
//! ```text
//! {"Type":112,"SymbolID":1,"Price":4000.25,...}\n
//! ```
//! The payload is the exact wire JSON (no frame delimiter). Compact JSON
//! escapes control characters, so a payload never contains a raw newline.
//!
//! Every line is flushed to the OS before `append` returns; lines are never
//! batched in process memory. `FsyncPolicy` only decides how often the file
//! is also forced to disk. A write failure is reported to the caller rather
//! than retried.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use feed_types::errors::DecodeError;
use feed_types::message::Message;
use thiserror::Error;
use tracing::{debug, info};

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("payload contains a line terminator ({len} bytes)")]
    EmbeddedNewline { len: usize },

    #[error("line {line}: {source}")]
    Decode {
        line: u64,
        #[source]
        source: DecodeError,
    },
}

// ── Fsync Policy ────────────────────────────────────────────────────

/// Controls when `fsync` is called. Flushing to the OS happens on every
/// line regardless.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FsyncPolicy {
    /// Leave durability to the OS.
    Never,
    /// Fsync after every line.
    EveryWrite,
    /// Fsync every N lines.
    EveryN(usize),
}

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub path: PathBuf,
    /// Keep existing content (true) or truncate on open (false).
    pub append: bool,
    pub fsync_policy: FsyncPolicy,
}

impl LogConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append: true,
            fsync_policy: FsyncPolicy::Never,
        }
    }
}

// ── Writer ──────────────────────────────────────────────────────────

/// Append-only message log.
pub struct MessageLog {
    config: LogConfig,
    writer: BufWriter<File>,
    lines_written: u64,
    bytes_written: u64,
    writes_since_fsync: usize,
}

impl MessageLog {
    /// Open (or create) the log, creating the parent directory if needed.
    pub fn open(config: LogConfig) -> Result<Self, LogError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut options = OpenOptions::new();
        options.create(true);
        if config.append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let file = options.open(&config.path)?;
        let existing = file.metadata()?.len();

        info!(
            path = %config.path.display(),
            append = config.append,
            existing_bytes = existing,
            "Message log opened"
        );

        Ok(Self {
            config,
            writer: BufWriter::new(file),
            lines_written: 0,
            bytes_written: 0,
            writes_since_fsync: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Lines appended through this handle.
    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append one already-encoded JSON payload as a line.
    pub fn append_payload(&mut self, payload: &[u8]) -> Result<(), LogError> {
        if payload.contains(&b'\n') {
            return Err(LogError::EmbeddedNewline { len: payload.len() });
        }

        self.writer.write_all(payload)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        self.lines_written += 1;
        self.bytes_written += payload.len() as u64 + 1;
        self.writes_since_fsync += 1;

        self.apply_fsync_policy()?;
        Ok(())
    }

    /// Encode and append one message.
    pub fn append(&mut self, message: &Message) -> Result<(), LogError> {
        let payload = message.to_vec()?;
        self.append_payload(&payload)
    }

    /// Force flush + fsync.
    pub fn sync(&mut self) -> Result<(), LogError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writes_since_fsync = 0;
        Ok(())
    }

    fn apply_fsync_policy(&mut self) -> Result<(), LogError> {
        let should_fsync = match self.config.fsync_policy {
            FsyncPolicy::Never => false,
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => self.writes_since_fsync >= n,
        };
        if should_fsync {
            self.writer.get_ref().sync_all()?;
            self.writes_since_fsync = 0;
            debug!(lines = self.lines_written, "Message log synced");
        }
        Ok(())
    }
}

impl Drop for MessageLog {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

// ── Reader ──────────────────────────────────────────────────────────

/// Reads a finished (non-growing) log back as messages.
///
/// Blank lines are skipped. A line that does not decode yields
/// `LogError::Decode` for that line and reading continues.
pub struct LogReader<R> {
    lines: io::Lines<R>,
    line: u64,
}

impl LogReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> LogReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }
}

impl<R: BufRead> Iterator for LogReader<R> {
    type Item = Result<Message, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(e) => return Some(Err(LogError::Io(e))),
            };
            self.line += 1;
            if text.trim().is_empty() {
                continue;
            }
            let line = self.line;
            return Some(
                Message::from_slice(text.as_bytes())
                    .map_err(|source| LogError::Decode { line, source }),
            );
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
