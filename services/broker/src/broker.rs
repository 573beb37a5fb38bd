//! Broker: log every upstream message, fan it out to every subscriber
//!
//! The subscriber list and the log handle live behind one mutex. The accept
//! thread takes it to add subscribers; `ingest` takes it to sweep, log and
//! broadcast. Subscribers found dead are removed at the start of the next
//! ingest, never while a broadcast is iterating.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use feed_client::{AsyncFeedClient, ClientOptions, FeedError, FeedFrame, FeedItem, DELIMITER};
use feed_types::message::Message;
use parking_lot::Mutex;
use persistence::journal::{LogConfig, LogError, MessageLog};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::subscriber::{Frame, OverflowPolicy, Subscriber};

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("message log write failed: {0}")]
    Log(#[from] LogError),

    #[error("cannot encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("upstream feed failed: {0}")]
    Feed(#[from] FeedError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address subscribers connect to.
    pub listen_addr: String,
    pub log: LogConfig,
    /// Outbound queue capacity per subscriber.
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl BrokerConfig {
    pub fn new(listen_addr: impl Into<String>, log: LogConfig) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            log,
            queue_capacity: 4096,
            overflow: OverflowPolicy::default(),
        }
    }
}

// ── Broker ──────────────────────────────────────────────────────────

struct Shared {
    subscribers: Vec<Subscriber>,
    log: MessageLog,
    next_id: u64,
    ingested: u64,
}

impl Shared {
    /// Remove subscribers whose delivery has stopped or that were marked dead.
    fn sweep(&mut self) {
        if self.subscribers.iter().all(Subscriber::is_alive) {
            return;
        }
        let (alive, dead): (Vec<_>, Vec<_>) = self
            .subscribers
            .drain(..)
            .partition(Subscriber::is_alive);
        self.subscribers = alive;
        for subscriber in dead {
            subscriber.shutdown();
        }
        debug!(remaining = self.subscribers.len(), "Swept dead subscribers");
    }
}

pub struct Broker {
    config: BrokerConfig,
    shared: Arc<Mutex<Shared>>,
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl Broker {
    /// Open the log, bind the listener and start accepting subscribers.
    pub fn bind(config: BrokerConfig) -> Result<Self, BrokerError> {
        let log = MessageLog::open(config.log.clone())?;
        let listener =
            TcpListener::bind(&config.listen_addr).map_err(|source| BrokerError::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(Mutex::new(Shared {
            subscribers: Vec::new(),
            log,
            next_id: 0,
            ingested: 0,
        }));
        let stop = Arc::new(AtomicBool::new(false));

        let acceptor = {
            let shared = Arc::clone(&shared);
            let stop = Arc::clone(&stop);
            let capacity = config.queue_capacity;
            thread::Builder::new()
                .name("broker-accept".to_string())
                .spawn(move || accept_loop(listener, shared, capacity, stop))?
        };

        info!(
            addr = %local_addr,
            log = %config.log.path.display(),
            queue_capacity = config.queue_capacity,
            overflow = ?config.overflow,
            "Broker listening"
        );

        Ok(Self {
            config,
            shared,
            local_addr,
            stop,
            acceptor: Some(acceptor),
        })
    }

    /// Upstream client options for feeding a broker.
    ///
    /// Raw mode: frames are logged and republished byte for byte, including
    /// ones the message model would reject or re-encode differently.
    pub fn client_options() -> ClientOptions {
        ClientOptions {
            raw: true,
            ..ClientOptions::default()
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Subscribers currently held, including any not yet swept.
    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().subscribers.len()
    }

    /// Messages logged and broadcast so far.
    pub fn ingested(&self) -> u64 {
        self.shared.lock().ingested
    }

    /// Log and broadcast one message.
    pub fn ingest(&self, message: &Message) -> Result<(), BrokerError> {
        let payload = message.to_vec()?;
        self.ingest_payload(&payload)
    }

    /// Log and broadcast one encoded payload (no delimiter).
    ///
    /// A log write failure is returned before any subscriber sees the payload.
    pub fn ingest_payload(&self, payload: &[u8]) -> Result<(), BrokerError> {
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.extend_from_slice(payload);
        frame.push(DELIMITER);
        let frame: Frame = frame.into();

        let mut shared = self.shared.lock();
        shared.sweep();

        if let Err(e) = shared.log.append_payload(payload) {
            error!(error = %e, "Message log write failed");
            return Err(e.into());
        }

        let policy = self.config.overflow;
        for subscriber in shared.subscribers.iter_mut() {
            subscriber.push(&frame, policy);
        }
        shared.ingested += 1;

        debug!(
            seq = shared.ingested,
            bytes = payload.len(),
            subscribers = shared.subscribers.len(),
            "Ingested"
        );
        Ok(())
    }

    /// Handle one feed item. Returns the error that should stop the feed.
    fn handle(&self, item: FeedItem) -> Result<(), BrokerError> {
        match item {
            Ok(FeedFrame::Message(message)) => self.ingest(&message),
            Ok(FeedFrame::Raw(payload)) if payload.contains(&b'\n') => {
                warn!(bytes = payload.len(), "Skipping upstream frame with a line break");
                Ok(())
            }
            Ok(FeedFrame::Raw(payload)) => self.ingest_payload(&payload),
            Err(e) if !e.is_fatal() => {
                warn!(error = %e, "Skipping upstream frame");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ingest every item of a threaded client's sequence until it ends.
    pub fn pump<I>(&self, items: I) -> Result<u64, BrokerError>
    where
        I: IntoIterator<Item = FeedItem>,
    {
        for item in items {
            self.handle(item)?;
        }
        let total = self.ingested();
        info!(ingested = total, "Upstream feed ended");
        Ok(total)
    }

    /// Ingest every item of a cooperative client until its sequence ends.
    pub async fn pump_async<C: AsyncFeedClient>(&self, client: &mut C) -> Result<u64, BrokerError> {
        while let Some(item) = client.recv().await {
            self.handle(item)?;
        }
        let total = self.ingested();
        info!(ingested = total, "Upstream feed ended");
        Ok(total)
    }

    /// Stop accepting, disconnect every subscriber and sync the log.
    pub fn shutdown(&mut self) {
        let Some(acceptor) = self.acceptor.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        // Wake the blocking accept.
        let _ = TcpStream::connect(wake_addr(self.local_addr));
        if acceptor.join().is_err() {
            warn!("Accept thread panicked");
        }

        let mut shared = self.shared.lock();
        for subscriber in shared.subscribers.drain(..) {
            subscriber.shutdown();
        }
        if let Err(e) = shared.log.sync() {
            warn!(error = %e, "Final log sync failed");
        }
        info!(ingested = shared.ingested, "Broker stopped");
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn wake_addr(addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
    } else {
        addr
    }
}

fn accept_loop(
    listener: TcpListener,
    shared: Arc<Mutex<Shared>>,
    capacity: usize,
    stop: Arc<AtomicBool>,
) {
    for conn in listener.incoming() {
        if stop.load(Ordering::Acquire) {
            break;
        }
        let socket = match conn {
            Ok(socket) => socket,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                continue;
            }
        };

        let mut shared = shared.lock();
        let id = shared.next_id;
        shared.next_id += 1;
        match Subscriber::spawn(id, socket, capacity) {
            Ok(subscriber) => shared.subscribers.push(subscriber),
            Err(e) => warn!(subscriber = id, error = %e, "Cannot start subscriber"),
        }
    }
    debug!("Accept loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use feed_types::errors::DecodeError;
    use std::fs;
    use std::io;
    use tempfile::TempDir;

    fn broker(tmp: &TempDir) -> Broker {
        let log = LogConfig::new(tmp.path().join("ES.log"));
        Broker::bind(BrokerConfig::new("127.0.0.1:0", log)).unwrap()
    }

    fn log_lines(tmp: &TempDir) -> Vec<String> {
        fs::read_to_string(tmp.path().join("ES.log"))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_logs_every_message_without_subscribers() {
        let tmp = TempDir::new().unwrap();
        let broker = broker(&tmp);

        for _ in 0..3 {
            broker.ingest(&Message::heartbeat()).unwrap();
        }
        assert_eq!(broker.ingested(), 3);
        assert_eq!(log_lines(&tmp), vec![r#"{"Type":3}"#; 3]);
    }

    #[test]
    fn test_pump_skips_decode_errors_and_forwards_raw() {
        let tmp = TempDir::new().unwrap();
        let broker = broker(&tmp);

        let items: Vec<FeedItem> = vec![
            Ok(FeedFrame::Message(Message::heartbeat())),
            Err(FeedError::Decode(DecodeError::MissingType)),
            Ok(FeedFrame::Raw(Bytes::from_static(br#"{"Type":9,"A":1}"#))),
        ];
        assert_eq!(broker.pump(items).unwrap(), 2);
        assert_eq!(log_lines(&tmp), vec![r#"{"Type":3}"#, r#"{"Type":9,"A":1}"#]);
    }

    #[test]
    fn test_raw_frame_with_line_break_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let broker = broker(&tmp);

        let items: Vec<FeedItem> = vec![
            Ok(FeedFrame::Raw(Bytes::from_static(b"{\"Type\":3,\n\"X\":1}"))),
            Ok(FeedFrame::Raw(Bytes::from_static(br#"{"Type":3}"#))),
        ];
        assert_eq!(broker.pump(items).unwrap(), 1);
        assert_eq!(log_lines(&tmp), vec![r#"{"Type":3}"#]);
    }

    #[test]
    fn test_client_options_are_raw() {
        assert!(Broker::client_options().raw);
    }

    #[test]
    fn test_pump_stops_on_fatal_error() {
        let tmp = TempDir::new().unwrap();
        let broker = broker(&tmp);

        let items: Vec<FeedItem> = vec![
            Ok(FeedFrame::Message(Message::heartbeat())),
            Err(FeedError::HeartbeatFailure(io::Error::from(io::ErrorKind::BrokenPipe))),
            Ok(FeedFrame::Message(Message::heartbeat())),
        ];
        let err = broker.pump(items).unwrap_err();
        assert!(matches!(err, BrokerError::Feed(FeedError::HeartbeatFailure(_))));
        assert_eq!(broker.ingested(), 1);
    }

    #[test]
    fn test_unwritable_log_fails_bind() {
        let tmp = TempDir::new().unwrap();
        // A directory cannot be opened as the log file.
        let log = LogConfig::new(tmp.path());
        let result = Broker::bind(BrokerConfig::new("127.0.0.1:0", log));
        assert!(matches!(result, Err(BrokerError::Log(_))));
    }

    #[test]
    fn test_wake_addr_replaces_unspecified() {
        let addr: SocketAddr = "0.0.0.0:1234".parse().unwrap();
        assert_eq!(wake_addr(addr), "127.0.0.1:1234".parse::<SocketAddr>().unwrap());
    }
}
