//! Persistence for the market data feed
//!
//! - `journal`: the broker's append-only message log, one JSON line per
//!   ingested message, flushed on every write
//! - `tail`: live tailing of a growing line-oriented file with an idle budget

pub mod journal;
pub mod tail;

pub use journal::{FsyncPolicy, LogConfig, LogError, LogReader, MessageLog};
pub use tail::{tail_lines, LiveTail, TailConfig, TailError, TailSource};
