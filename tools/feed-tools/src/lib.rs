//! Feed tools
//!
//! Small converters that sit at the edge of the feed: turning a broker log
//! into a tick CSV, and downloading historical ticks or bars to CSV.
//!
//! # Modules
//! - `common`: logging setup shared by the binaries
//! - `csv`: row formats and a flushed CSV writer
//! - `export`: trades from a message stream to tick rows
//! - `history`: historical request/response handling

pub mod common;
pub mod csv;
pub mod export;
pub mod history;
