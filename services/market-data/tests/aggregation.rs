//! End-to-end aggregation tests
//!
//! Messages go through the message log (or a live tail of it) into the
//! engine and out to real CSV files.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use feed_types::message::Message;
use feed_types::trade::{Side, Trade};
use market_data::{
    csv_sink, AggregationEngine, ComputeMode, CsvSink, EngineConfig, Outcome, IMBALANCE_HEADER,
    OHLC_HEADER,
};
use persistence::journal::{LogConfig, LogReader, MessageLog};
use persistence::tail::{LiveTail, TailConfig};
use rust_decimal::Decimal;
use tempfile::TempDir;

fn trade(time: i64, cents: i64, volume: i64, side: Side) -> Message {
    Message::Trade(Trade::new(
        Decimal::from(time),
        Decimal::new(cents, 2),
        Decimal::from(volume),
        side,
    ))
}

fn session() -> Vec<Message> {
    vec![
        Message::heartbeat(),
        trade(1_601_481_600, 333300, 2, Side::Bid),
        trade(1_601_481_601, 333325, 1, Side::Ask),
        Message::heartbeat(),
        trade(1_601_481_630, 333275, 3, Side::Bid),
        trade(1_601_481_661, 333300, 1, Side::Ask),
        trade(1_601_481_662, 333300, 4, Side::Bid),
        trade(1_601_481_725, 333350, 2, Side::Ask),
    ]
}

fn write_log(path: &Path, messages: &[Message]) {
    let mut log = MessageLog::open(LogConfig::new(path)).unwrap();
    for message in messages {
        log.append(message).unwrap();
    }
}

fn engine(tmp: &TempDir, mode: ComputeMode) -> AggregationEngine<CsvSink> {
    let sink = csv_sink(mode, tmp.path().join("hist.csv"), tmp.path().join("rt.csv"), false).unwrap();
    let config = EngineConfig {
        period: "1min".parse().unwrap(),
        mode,
    };
    AggregationEngine::new(config, sink)
}

fn read(tmp: &TempDir, name: &str) -> String {
    fs::read_to_string(tmp.path().join(name)).unwrap()
}

#[test]
fn test_ohlc_from_log_file() {
    let tmp = TempDir::new().unwrap();
    let log = tmp.path().join("ES.log");
    write_log(&log, &session());

    let mut engine = engine(&tmp, ComputeMode::Ohlc);
    let mut outcomes = Vec::new();
    for message in LogReader::open(&log).unwrap() {
        outcomes.push(engine.ingest(&message.unwrap()).unwrap());
    }
    assert_eq!(outcomes.iter().filter(|o| **o == Outcome::Ignored).count(), 2);

    assert_eq!(
        read(&tmp, "hist.csv"),
        [
            OHLC_HEADER,
            "1601481600,3333.00,3333.25,3332.75,3332.75,6",
            "1601481660,3333.00,3333.00,3333.00,3333.00,5",
            "",
        ]
        .join("\n")
    );
    assert_eq!(
        read(&tmp, "rt.csv"),
        format!("{}\n1601481720,3333.50,3333.50,3333.50,3333.50,2\n", OHLC_HEADER)
    );
}

#[test]
fn test_imbalance_historical_has_one_row_per_level() {
    let tmp = TempDir::new().unwrap();
    let mut engine = engine(&tmp, ComputeMode::Imbalance);
    for message in session() {
        engine.ingest(&message).unwrap();
    }

    let historical = read(&tmp, "hist.csv");
    let lines: Vec<&str> = historical.lines().collect();
    assert_eq!(lines[0], IMBALANCE_HEADER);
    assert_eq!(
        &lines[1..],
        &[
            "1601481600,3332.75,3,0,3,3.00,0.00,0.5000",
            "1601481600,3333.00,2,0,2,2.00,0.00,0.3333",
            "1601481600,3333.25,0,1,1,0.00,0.50,0.1667",
            "1601481660,3333.00,4,1,5,4.00,1.00,1.0000",
        ]
    );

    let realtime = read(&tmp, "rt.csv");
    assert_eq!(
        realtime,
        format!("{}\n1601481720,3333.50,0,2,2,0.00,2.00,1.0000\n", IMBALANCE_HEADER)
    );
}

#[test]
fn test_identical_input_gives_identical_output() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    for tmp in [&first, &second] {
        let mut engine = engine(tmp, ComputeMode::Imbalance);
        for message in session() {
            engine.ingest(&message).unwrap();
        }
    }
    assert_eq!(read(&first, "hist.csv"), read(&second, "hist.csv"));
    assert_eq!(read(&first, "rt.csv"), read(&second, "rt.csv"));
}

#[test]
fn test_follow_growing_log() {
    let tmp = TempDir::new().unwrap();
    let log = tmp.path().join("ES.log");
    let messages = session();
    write_log(&log, &messages[..3]);

    let writer = {
        let log = log.clone();
        let rest = messages[3..].to_vec();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            write_log(&log, &rest);
        })
    };

    let config = TailConfig {
        poll_interval: Duration::from_millis(5),
        max_idle: Duration::from_millis(500),
    };
    let mut engine = engine(&tmp, ComputeMode::Ohlc);
    for line in LiveTail::open(&log, config).unwrap() {
        let message = Message::from_slice(line.unwrap().as_bytes()).unwrap();
        engine.ingest(&message).unwrap();
    }
    writer.join().unwrap();

    assert_eq!(engine.trades_applied(), 6);
    assert_eq!(engine.current_bucket(), Some(1_601_481_720));
    assert_eq!(read(&tmp, "hist.csv").lines().count(), 3);
}
