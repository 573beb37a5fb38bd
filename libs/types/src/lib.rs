//! Types library for the market data feed
//!
//! Message model shared by every crate in the workspace: the feed client
//! decodes into it, the broker republishes it, the aggregation engine reads
//! trades out of it.
//!
//! # Modules
//! - `message`: `Message` tagged by `Type`, session messages, type codes
//! - `trade`: trade prints and the bid/ask side flag
//! - `history`: historical price data request and records
//! - `numeric`: decimal prices and volumes as JSON numbers
//! - `errors`: per-frame decode errors

pub mod errors;
pub mod history;
pub mod message;
pub mod numeric;
pub mod trade;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::*;
    pub use crate::history::*;
    pub use crate::message::*;
    pub use crate::trade::*;
}
