//! Fan-out broker for the market data feed
//!
//! Logs every message arriving from the upstream feed and republishes it,
//! framed exactly as it arrived, to every connected subscriber.

pub mod broker;
pub mod subscriber;

pub use broker::{Broker, BrokerConfig, BrokerError};
pub use subscriber::{Delivery, Frame, OverflowPolicy, Outbox, Subscriber};
