//! TCP relay
//!
//! Each downstream connection is paired with a fresh connection to one fixed
//! upstream address and bytes are copied in both directions untouched.

pub mod relay;

pub use relay::{Direction, Relay, RelayConfig, RelayError};
