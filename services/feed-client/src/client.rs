//! Client contract shared by the threaded and cooperative variants
//!
//! Both variants walk the same state machine:
//!
//! ```text
//! Disconnected --connect--> Connected --logon--> LoggedOn --close / EOF / fatal--> Closed
//! ```
//!
//! Heartbeats start at logon and stop at `Closed`. Items are delivered in
//! wire order through a bounded queue; a malformed frame yields one
//! `Err(FeedError::Decode)` item and the sequence continues, any other error
//! item is the last one before the sequence ends.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use feed_types::errors::DecodeError;
use feed_types::message::Message;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

use crate::codec::{decode_frame, DEFAULT_CHUNK_SIZE};

// ── State ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connected,
    LoggedOn,
    Closed,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientState::Disconnected => "disconnected",
            ClientState::Connected => "connected",
            ClientState::LoggedOn => "logged on",
            ClientState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// State cell shared between the caller and the client's workers.
#[derive(Debug, Clone)]
pub(crate) struct SharedState(Arc<Mutex<ClientState>>);

impl SharedState {
    pub(crate) fn new(state: ClientState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    pub(crate) fn get(&self) -> ClientState {
        *self.0.lock()
    }

    pub(crate) fn set(&self, state: ClientState) {
        *self.0.lock() = state;
    }

    /// Move to `Closed`; returns the state it replaced.
    pub(crate) fn close(&self) -> ClientState {
        std::mem::replace(&mut *self.0.lock(), ClientState::Closed)
    }

    /// Fail with `InvalidState` unless the client is in `expected`.
    pub(crate) fn require(
        &self,
        expected: ClientState,
        operation: &'static str,
    ) -> Result<(), FeedError> {
        let state = self.get();
        if state == expected {
            Ok(())
        } else {
            Err(FeedError::InvalidState { operation, state })
        }
    }

    /// Sending is allowed once connected and until closed.
    pub(crate) fn require_open(&self, operation: &'static str) -> Result<(), FeedError> {
        match self.get() {
            ClientState::Connected | ClientState::LoggedOn => Ok(()),
            state => Err(FeedError::InvalidState { operation, state }),
        }
    }
}

// ── Options ─────────────────────────────────────────────────────────

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// How often the client sends a heartbeat once logged on.
    pub heartbeat_interval: Duration,
    /// Heartbeat interval advertised to the server in the logon request.
    pub advertised_heartbeat_secs: u32,
    /// `ClientName` field of the logon request.
    pub client_name: String,
    /// Deliver undecoded frame payloads instead of messages.
    pub raw: bool,
    /// Drop heartbeat messages before delivery. Ignored in raw mode.
    pub filter_heartbeats: bool,
    /// Capacity of the raw byte queue (threaded variant).
    pub byte_queue_capacity: usize,
    /// Capacity of the delivered item queue.
    pub message_queue_capacity: usize,
    /// Bytes requested per socket read.
    pub read_chunk_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            advertised_heartbeat_secs: 5,
            client_name: "hello".to_string(),
            raw: false,
            filter_heartbeats: false,
            byte_queue_capacity: 4096,
            message_queue_capacity: 4096,
            read_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Logon credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read a two-line credentials file: username, then password.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FeedError> {
        let path = path.as_ref();
        let invalid = |reason: String| FeedError::Credentials {
            path: path.to_path_buf(),
            reason,
        };

        let text = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let mut lines = text.lines();
        let username = lines
            .next()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .ok_or_else(|| invalid("missing username on line 1".to_string()))?;
        let password = lines
            .next()
            .map(str::trim)
            .ok_or_else(|| invalid("missing password on line 2".to_string()))?;

        Ok(Self::new(username, password))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ── Items ───────────────────────────────────────────────────────────

/// One delivered frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedFrame {
    Message(Message),
    /// Payload bytes without the delimiter (raw mode).
    Raw(Bytes),
}

impl FeedFrame {
    pub fn into_message(self) -> Option<Message> {
        match self {
            FeedFrame::Message(message) => Some(message),
            FeedFrame::Raw(_) => None,
        }
    }
}

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connection error: {0}")]
    Connection(#[from] io::Error),

    #[error("malformed frame: {0}")]
    Decode(#[from] DecodeError),

    #[error("cannot encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("heartbeat send failed: {0}")]
    HeartbeatFailure(#[source] io::Error),

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ClientState,
    },

    #[error("invalid credentials file {path}: {reason}")]
    Credentials { path: PathBuf, reason: String },
}

impl FeedError {
    /// Fatal errors end the item sequence; decode errors do not.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FeedError::Decode(_))
    }
}

pub type FeedItem = Result<FeedFrame, FeedError>;

/// Turn one frame into the item the caller sees, or `None` if filtered.
pub(crate) fn deliver(frame: BytesMut, options: &ClientOptions) -> Option<FeedItem> {
    if options.raw {
        return Some(Ok(FeedFrame::Raw(frame.freeze())));
    }
    match decode_frame(&frame) {
        Ok(message) if options.filter_heartbeats && message.is_heartbeat() => None,
        Ok(message) => Some(Ok(FeedFrame::Message(message))),
        Err(e) => {
            warn!(error = %e, bytes = frame.len(), "Dropping malformed frame");
            Some(Err(FeedError::Decode(e)))
        }
    }
}

// ── Contracts ───────────────────────────────────────────────────────

/// Feed client driven by dedicated threads.
pub trait FeedClient {
    /// Open the TCP connection. No bytes are exchanged yet.
    fn connect(addr: &str, options: ClientOptions) -> Result<Self, FeedError>
    where
        Self: Sized;

    /// Send the logon request and start reading and heartbeating.
    fn logon(&mut self, credentials: &Credentials) -> Result<(), FeedError>;

    /// Send one message upstream.
    fn send(&self, message: &Message) -> Result<(), FeedError>;

    /// Block for the next item; `None` once the sequence has ended.
    fn recv(&mut self) -> Option<FeedItem>;

    /// Stop heartbeats and workers and close the socket. Idempotent.
    fn close(&mut self);

    fn state(&self) -> ClientState;

    /// Items as an iterator over `recv`.
    fn messages(&mut self) -> Messages<'_, Self>
    where
        Self: Sized,
    {
        Messages { client: self }
    }
}

/// Iterator returned by [`FeedClient::messages`].
pub struct Messages<'a, C> {
    client: &'a mut C,
}

impl<C: FeedClient> Iterator for Messages<'_, C> {
    type Item = FeedItem;

    fn next(&mut self) -> Option<FeedItem> {
        self.client.recv()
    }
}

/// Feed client driven by tasks on a tokio runtime.
#[async_trait]
pub trait AsyncFeedClient: Send {
    async fn connect(addr: &str, options: ClientOptions) -> Result<Self, FeedError>
    where
        Self: Sized;

    async fn logon(&mut self, credentials: &Credentials) -> Result<(), FeedError>;

    async fn send(&self, message: &Message) -> Result<(), FeedError>;

    async fn recv(&mut self) -> Option<FeedItem>;

    async fn close(&mut self);

    fn state(&self) -> ClientState;
}
