//! Trades out of a message stream, as tick rows

use std::io::Write;

use feed_types::message::Message;
use thiserror::Error;
use tracing::debug;

use crate::csv::{tick_row, CsvWriter};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("output write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("upstream feed failed: {0}")]
    Feed(#[from] feed_client::FeedError),
}

/// Writes one tick row per trade and skips everything else.
pub struct TickExporter<W: Write> {
    writer: CsvWriter<W>,
    skipped: u64,
}

impl<W: Write> TickExporter<W> {
    pub fn new(writer: CsvWriter<W>) -> Self {
        Self { writer, skipped: 0 }
    }

    /// Returns whether the message was a trade.
    pub fn handle(&mut self, message: &Message) -> Result<bool, ExportError> {
        match message.as_trade() {
            Some(trade) => {
                self.writer.write_row(&tick_row(trade))?;
                Ok(true)
            }
            None => {
                self.skipped += 1;
                debug!(kind = message.message_type().label(), "Not a trade");
                Ok(false)
            }
        }
    }

    pub fn trades(&self) -> u64 {
        self.writer.rows()
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn writer(&self) -> &CsvWriter<W> {
        &self.writer
    }
}
