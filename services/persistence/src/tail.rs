//! Live tailing of a growing line-oriented file
//!
//! [`LiveTail`] yields complete lines as they are appended. A line is held
//! back until its `\n` arrives, so a writer caught mid-line is never seen.
//! When no data is available the tail either stops (closed source) or sleeps
//! one poll interval and retries, spending an idle budget that any new data
//! refills. Once the budget is spent the sequence ends without error.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum TailError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read failed: {0}")]
    Io(#[from] io::Error),

    #[error("line {line} is not valid UTF-8")]
    InvalidUtf8 { line: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct TailConfig {
    /// Sleep between retries while no data is available.
    pub poll_interval: Duration,
    /// Total time to wait without new data before giving up.
    pub max_idle: Duration,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_idle: Duration::from_secs(16 * 60),
        }
    }
}

/// A readable source that knows whether more data can ever arrive.
pub trait TailSource: BufRead {
    /// True once the source can produce no more bytes.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Files can always grow.
impl TailSource for BufReader<File> {}

impl<T: AsRef<[u8]>> TailSource for Cursor<T> {
    fn is_closed(&self) -> bool {
        self.position() >= self.get_ref().as_ref().len() as u64
    }
}

impl TailSource for &[u8] {
    fn is_closed(&self) -> bool {
        self.is_empty()
    }
}

/// Lazy sequence of complete lines, terminator stripped.
pub struct LiveTail<S> {
    source: S,
    config: TailConfig,
    pending: Vec<u8>,
    idle: Duration,
    lines: u64,
    done: bool,
}

impl<S: TailSource> LiveTail<S> {
    pub fn new(source: S, config: TailConfig) -> Self {
        Self {
            source,
            config,
            pending: Vec::new(),
            idle: Duration::ZERO,
            lines: 0,
            done: false,
        }
    }

    /// Lines yielded so far.
    pub fn lines_read(&self) -> u64 {
        self.lines
    }

    fn finish(&mut self, reason: &'static str) {
        self.done = true;
        if !self.pending.is_empty() {
            debug!(bytes = self.pending.len(), "Dropping unterminated line");
            self.pending.clear();
        }
        info!(lines = self.lines, reason, "Tail finished");
    }

    fn take_line(&mut self) -> Result<String, TailError> {
        self.pending.pop();
        if self.pending.last() == Some(&b'\r') {
            self.pending.pop();
        }
        self.lines += 1;
        let bytes = std::mem::take(&mut self.pending);
        String::from_utf8(bytes).map_err(|_| TailError::InvalidUtf8 { line: self.lines })
    }
}

impl LiveTail<BufReader<File>> {
    /// Tail a file from its beginning.
    pub fn open(path: impl AsRef<Path>, config: TailConfig) -> Result<Self, TailError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| TailError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufReader::new(file), config))
    }
}

impl<S: TailSource> Iterator for LiveTail<S> {
    type Item = Result<String, TailError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let before = self.pending.len();
            match self.source.read_until(b'\n', &mut self.pending) {
                Ok(0) => {
                    if self.source.is_closed() {
                        self.finish("source closed");
                        return None;
                    }
                    if self.idle >= self.config.max_idle {
                        self.finish("idle budget exhausted");
                        return None;
                    }
                    thread::sleep(self.config.poll_interval);
                    self.idle += self.config.poll_interval;
                }
                Ok(_) => {
                    if self.pending.len() > before {
                        self.idle = Duration::ZERO;
                    }
                    if self.pending.last() == Some(&b'\n') {
                        return Some(self.take_line());
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Tail read failed");
                    self.done = true;
                    return Some(Err(TailError::Io(e)));
                }
            }
        }
        None
    }
}

/// Tail `source` with the given poll interval and idle budget.
pub fn tail_lines<S: TailSource>(
    source: S,
    poll_interval: Duration,
    max_idle: Duration,
) -> LiveTail<S> {
    LiveTail::new(
        source,
        TailConfig {
            poll_interval,
            max_idle,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::time::Instant;
    use tempfile::NamedTempFile;

    fn quick() -> TailConfig {
        TailConfig {
            poll_interval: Duration::from_millis(5),
            max_idle: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_closed_source_yields_complete_lines_only() {
        let lines: Vec<String> = LiveTail::new(&b"a\nb\r\npartial"[..], quick())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn test_cursor_reports_closed_when_exhausted() {
        let mut cursor = Cursor::new(b"x\n".to_vec());
        assert!(!cursor.is_closed());
        let mut line = Vec::new();
        cursor.read_until(b'\n', &mut line).unwrap();
        assert!(cursor.is_closed());
    }

    #[test]
    fn test_invalid_utf8_is_per_line() {
        let results: Vec<_> = LiveTail::new(&b"ok\n\xff\xfe\nok\n"[..], quick()).collect();
        assert_eq!(results.len(), 3);
        assert!(matches!(results[1], Err(TailError::InvalidUtf8 { line: 2 })));
        assert_eq!(results[2].as_ref().unwrap(), "ok");
    }

    #[test]
    fn test_idle_budget_ends_open_file() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "only\n").unwrap();

        let started = Instant::now();
        let lines: Vec<String> = LiveTail::open(file.path(), quick())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(lines, vec!["only"]);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_partial_line_held_until_terminator() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        std::fs::write(&path, "first\nsec").unwrap();

        let config = TailConfig {
            poll_interval: Duration::from_millis(5),
            max_idle: Duration::from_secs(2),
        };
        let mut tail = LiveTail::open(&path, config).unwrap();
        assert_eq!(tail.next().unwrap().unwrap(), "first");

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"ond\nthird\n").unwrap();
        });

        assert_eq!(tail.next().unwrap().unwrap(), "second");
        assert_eq!(tail.next().unwrap().unwrap(), "third");
        writer.join().unwrap();
        assert_eq!(tail.lines_read(), 3);
    }

    #[test]
    fn test_new_data_refills_idle_budget() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();

        let config = TailConfig {
            poll_interval: Duration::from_millis(5),
            max_idle: Duration::from_millis(100),
        };
        // Three appends 50 ms apart span 150 ms, past a single 100 ms budget.
        let writer = thread::spawn(move || {
            for line in ["one\n", "two\n", "three\n"] {
                thread::sleep(Duration::from_millis(50));
                let mut file = OpenOptions::new().append(true).open(&path).unwrap();
                file.write_all(line.as_bytes()).unwrap();
            }
        });

        let lines: Vec<String> = LiveTail::open(file.path(), config)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        writer.join().unwrap();

        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_open_missing_file() {
        let err = LiveTail::open("/nonexistent/feed.log", quick()).err().unwrap();
        assert!(matches!(err, TailError::Open { .. }));
    }

    proptest! {
        #[test]
        fn prop_only_terminated_lines_are_yielded(
            lines in prop::collection::vec("[a-z0-9{}:,\"]{0,20}", 0..20),
            partial in "[a-z]{0,10}",
        ) {
            let mut text = String::new();
            for line in &lines {
                text.push_str(line);
                text.push('\n');
            }
            text.push_str(&partial);

            let read: Vec<String> = LiveTail::new(Cursor::new(text.into_bytes()), quick())
                .collect::<Result<_, _>>()
                .unwrap();
            prop_assert_eq!(read, lines);
        }
    }
}
