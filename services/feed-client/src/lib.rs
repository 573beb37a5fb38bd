//! Upstream feed client
//!
//! Connects to a market-data server speaking delimiter-framed JSON, logs on,
//! keeps the session alive with heartbeats and delivers decoded messages (or
//! raw frames) in wire order.
//!
//! Two variants share one contract:
//! - [`BlockingClient`]: reader, framer and heartbeat threads joined by
//!   bounded crossbeam queues ([`FeedClient`])
//! - [`CooperativeClient`]: tokio tasks over a `FramedRead` ([`AsyncFeedClient`])

pub mod blocking;
pub mod client;
pub mod codec;
pub mod cooperative;

pub use blocking::BlockingClient;
pub use client::{
    AsyncFeedClient, ClientOptions, ClientState, Credentials, FeedClient, FeedError, FeedFrame,
    FeedItem, Messages,
};
pub use codec::{decode, decode_frame, encode, FrameCodec, Frames, DELIMITER};
pub use cooperative::CooperativeClient;
