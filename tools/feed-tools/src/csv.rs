//! CSV rows for ticks and historical bars
//!
//! Numbers are written the way they arrived on the wire: integral values
//! without a fraction, others with only the digits they carry.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use feed_types::history::HistoricalPriceRecord;
use feed_types::trade::{Side, Trade};
use rust_decimal::Decimal;

pub const TICK_HEADER: &str = "DateTime,Price,Volume,AtBidOrAsk";
pub const BAR_HEADER: &str =
    "StartDateTime,OpenPrice,HighPrice,LowPrice,LastPrice,Volume,NumTrades,BidVolume,AskVolume";

fn plain(value: Decimal) -> Decimal {
    value.normalize()
}

/// `DateTime,Price,Volume,AtBidOrAsk`
pub fn tick_row(trade: &Trade) -> String {
    format!(
        "{},{},{},{}",
        plain(trade.date_time),
        plain(trade.price),
        plain(trade.volume),
        trade.side_code()
    )
}

/// A historical tick record as a tick row.
///
/// The side is read from whichever of `BidVolume`/`AskVolume` is set;
/// `None` when both are non-zero.
pub fn tick_row_from_record(record: &HistoricalPriceRecord) -> Option<String> {
    let side = match (record.bid_volume.is_zero(), record.ask_volume.is_zero()) {
        (false, false) => return None,
        (false, true) => Side::Bid,
        (true, _) => Side::Ask,
    };
    Some(format!(
        "{},{},{},{}",
        record.start_date_time,
        plain(record.last_price),
        plain(record.volume),
        side.code()
    ))
}

/// All bar fields, in `BAR_HEADER` order.
pub fn bar_row(record: &HistoricalPriceRecord) -> String {
    format!(
        "{},{},{},{},{},{},{},{},{}",
        record.start_date_time,
        plain(record.open_price),
        plain(record.high_price),
        plain(record.low_price),
        plain(record.last_price),
        plain(record.volume),
        record.num_trades,
        plain(record.bid_volume),
        plain(record.ask_volume)
    )
}

/// CSV output that writes its header first and flushes every row.
pub struct CsvWriter<W: Write> {
    inner: BufWriter<W>,
    rows: u64,
}

impl CsvWriter<File> {
    pub fn create(path: impl AsRef<Path>, header: &str) -> io::Result<Self> {
        Self::new(File::create(path)?, header)
    }
}

impl<W: Write> CsvWriter<W> {
    pub fn new(inner: W, header: &str) -> io::Result<Self> {
        let mut inner = BufWriter::new(inner);
        writeln!(inner, "{}", header)?;
        inner.flush()?;
        Ok(Self { inner, rows: 0 })
    }

    pub fn write_row(&mut self, row: &str) -> io::Result<()> {
        writeln!(self.inner, "{}", row)?;
        self.inner.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Data rows written, header excluded.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn get_ref(&self) -> &W {
        self.inner.get_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(bid: i64, ask: i64) -> HistoricalPriceRecord {
        serde_json::from_value(json!({
            "StartDateTime": 1570100303,
            "OpenPrice": 0,
            "HighPrice": 2865,
            "LowPrice": 2859.5,
            "LastPrice": 2865,
            "Volume": 1,
            "NumTrades": 1,
            "BidVolume": bid,
            "AskVolume": ask,
            "IsFinalRecord": 0
        }))
        .unwrap()
    }

    #[test]
    fn test_tick_row_keeps_wire_precision() {
        let trade = Trade::new(
            Decimal::new(1_601_481_600_125, 3),
            Decimal::new(333325, 2),
            Decimal::from(2),
            Side::Ask,
        );
        assert_eq!(tick_row(&trade), "1601481600.125,3333.25,2,2");
    }

    #[test]
    fn test_record_side_from_volumes() {
        assert_eq!(
            tick_row_from_record(&record(1, 0)).unwrap(),
            "1570100303,2865,1,1"
        );
        assert_eq!(
            tick_row_from_record(&record(0, 1)).unwrap(),
            "1570100303,2865,1,2"
        );
        assert!(tick_row_from_record(&record(1, 1)).is_none());
    }

    #[test]
    fn test_bar_row() {
        assert_eq!(bar_row(&record(0, 1)), "1570100303,0,2865,2859.5,2865,1,1,0,1");
    }

    #[test]
    fn test_writer_header_then_rows() {
        let mut writer = CsvWriter::new(Vec::new(), TICK_HEADER).unwrap();
        writer.write_row("1,2,3,1").unwrap();
        assert_eq!(writer.rows(), 1);
        assert_eq!(
            String::from_utf8(writer.get_ref().clone()).unwrap(),
            "DateTime,Price,Volume,AtBidOrAsk\n1,2,3,1\n"
        );
    }
}
