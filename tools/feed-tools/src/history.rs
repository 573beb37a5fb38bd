//! Historical data download
//!
//! One `HistoricalPriceDataRequest` is answered by a stream of
//! `HistoricalPriceRecord`s. The record flagged `IsFinalRecord` ends the
//! transfer and is not itself written.

use std::io::Write;

use feed_client::{FeedClient, FeedFrame};
use feed_types::history::{HistoricalPriceDataRequest, HistoricalPriceRecord};
use feed_types::message::Message;
use tracing::{info, warn};

use crate::csv::{bar_row, tick_row_from_record, CsvWriter, BAR_HEADER, TICK_HEADER};
use crate::export::ExportError;

/// Request id used for every download.
pub const REQUEST_ID: i32 = 10;

const PROGRESS_EVERY: u64 = 1_000_000;

/// Output row shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryFormat {
    /// `DateTime,Price,Volume,AtBidOrAsk`
    Ticks,
    /// Every record field.
    Bars,
}

impl HistoryFormat {
    pub fn header(&self) -> &'static str {
        match self {
            HistoryFormat::Ticks => TICK_HEADER,
            HistoryFormat::Bars => BAR_HEADER,
        }
    }
}

/// Whether the transfer is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Done,
}

/// Tick request for `symbol` between `start` and `end` (0 = open-ended).
pub fn tick_request(symbol: &str, exchange: &str, start: i64, end: i64) -> Message {
    Message::HistoricalPriceDataRequest(HistoricalPriceDataRequest::ticks(
        REQUEST_ID, symbol, exchange, start, end,
    ))
}

pub struct Downloader<W: Write> {
    writer: CsvWriter<W>,
    format: HistoryFormat,
    records: u64,
    rejected: u64,
}

impl<W: Write> Downloader<W> {
    /// `writer` must have been created with `format.header()`.
    pub fn new(writer: CsvWriter<W>, format: HistoryFormat) -> Self {
        Self {
            writer,
            format,
            records: 0,
            rejected: 0,
        }
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    /// Records with both bid and ask volume, not written in tick format.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn writer(&self) -> &CsvWriter<W> {
        &self.writer
    }

    pub fn handle(&mut self, message: &Message) -> Result<Step, ExportError> {
        let record = match message {
            Message::HistoricalPriceRecord(record) => record,
            Message::Heartbeat(_) => return Ok(Step::Continue),
            other => {
                warn!(kind = other.message_type().label(), "Unexpected message during download");
                return Ok(Step::Continue);
            }
        };
        if record.is_final_record {
            return Ok(Step::Done);
        }
        self.write(record)?;
        Ok(Step::Continue)
    }

    fn write(&mut self, record: &HistoricalPriceRecord) -> Result<(), ExportError> {
        let row = match self.format {
            HistoryFormat::Bars => bar_row(record),
            HistoryFormat::Ticks => match tick_row_from_record(record) {
                Some(row) => row,
                None => {
                    self.rejected += 1;
                    warn!(
                        start = record.start_date_time,
                        bid_volume = %record.bid_volume,
                        ask_volume = %record.ask_volume,
                        "Tick has volume on both sides, skipping"
                    );
                    return Ok(());
                }
            },
        };
        self.writer.write_row(&row)?;
        self.records += 1;
        if self.records % PROGRESS_EVERY == 0 {
            info!(records = self.records, up_to = record.start_date_time, "Download progress");
        }
        Ok(())
    }
}

/// Drain `client` into `downloader` until the final record, then close it.
///
/// Decode errors are skipped; the first fatal feed error is returned.
pub fn download<C: FeedClient, W: Write>(
    client: &mut C,
    downloader: &mut Downloader<W>,
) -> Result<u64, ExportError> {
    let mut finished = false;
    while let Some(item) = client.recv() {
        let message = match item {
            Ok(FeedFrame::Message(message)) => message,
            Ok(FeedFrame::Raw(_)) => continue,
            Err(e) if !e.is_fatal() => {
                warn!(error = %e, "Skipping frame");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if downloader.handle(&message)? == Step::Done {
            finished = true;
            break;
        }
    }
    client.close();

    if finished {
        info!(records = downloader.records(), "Download complete");
    } else {
        warn!(records = downloader.records(), "Feed ended before the final record");
    }
    Ok(downloader.records())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(start: i64, price: f64, bid: i64, ask: i64, last: bool) -> Message {
        let fields = json!({
            "Type": 803,
            "RequestID": REQUEST_ID,
            "StartDateTime": start,
            "OpenPrice": 0,
            "HighPrice": price,
            "LowPrice": price,
            "LastPrice": price,
            "Volume": bid + ask,
            "NumTrades": 1,
            "BidVolume": bid,
            "AskVolume": ask,
            "IsFinalRecord": u8::from(last)
        });
        Message::from_slice(fields.to_string().as_bytes()).unwrap()
    }

    fn output(downloader: &Downloader<Vec<u8>>) -> String {
        String::from_utf8(downloader.writer().get_ref().clone()).unwrap()
    }

    #[test]
    fn test_ticks_until_final_record() {
        let format = HistoryFormat::Ticks;
        let writer = CsvWriter::new(Vec::new(), format.header()).unwrap();
        let mut downloader = Downloader::new(writer, format);

        assert_eq!(downloader.handle(&record(1, 2865.0, 1, 0, false)).unwrap(), Step::Continue);
        assert_eq!(downloader.handle(&Message::heartbeat()).unwrap(), Step::Continue);
        assert_eq!(downloader.handle(&record(2, 2865.25, 0, 3, false)).unwrap(), Step::Continue);
        assert_eq!(downloader.handle(&record(3, 2866.0, 1, 1, false)).unwrap(), Step::Continue);
        assert_eq!(downloader.handle(&record(4, 2866.0, 0, 1, true)).unwrap(), Step::Done);

        assert_eq!(downloader.records(), 2);
        assert_eq!(downloader.rejected(), 1);
        assert_eq!(
            output(&downloader),
            format!("{}\n1,2865,1,1\n2,2865.25,3,2\n", TICK_HEADER)
        );
    }

    #[test]
    fn test_bars_keep_every_field() {
        let format = HistoryFormat::Bars;
        let writer = CsvWriter::new(Vec::new(), format.header()).unwrap();
        let mut downloader = Downloader::new(writer, format);

        downloader.handle(&record(7, 10.5, 2, 3, false)).unwrap();
        assert_eq!(output(&downloader), format!("{}\n7,0,10.5,10.5,10.5,5,1,2,3\n", BAR_HEADER));
    }

    #[test]
    fn test_tick_request_fields() {
        let request = tick_request("ESZ0", "CME", 100, 0);
        let fields = request.to_fields().unwrap();
        assert_eq!(fields["Type"], json!(800));
        assert_eq!(fields["RequestID"], json!(REQUEST_ID));
        assert_eq!(fields["RecordInterval"], json!(0));
        assert_eq!(fields["StartDateTime"], json!(100));
    }
}
