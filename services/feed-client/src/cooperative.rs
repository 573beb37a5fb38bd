//! Cooperative feed client on the tokio runtime
//!
//! Same contract as the threaded client with tasks instead of threads: a
//! reader task drives `FramedRead` over the socket's read half, a heartbeat
//! task ticks on an interval, both feed one bounded item queue. Only the
//! reader holds a strong sender, so the queue closes as soon as the reader
//! finishes, which ends the item sequence.

use std::sync::Arc;

use async_trait::async_trait;
use feed_types::message::Message;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

use crate::client::{
    deliver, AsyncFeedClient, ClientOptions, ClientState, Credentials, FeedError, FeedItem,
    SharedState,
};
use crate::codec::{encode, FrameCodec};

type Writer = Arc<Mutex<OwnedWriteHalf>>;

/// Feed client backed by tokio tasks.
pub struct CooperativeClient {
    addr: String,
    options: ClientOptions,
    state: SharedState,
    writer: Writer,
    read_half: Option<OwnedReadHalf>,
    items: Option<mpsc::Receiver<FeedItem>>,
    tasks: Vec<JoinHandle<()>>,
    finished: bool,
}

impl CooperativeClient {
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn finish(&mut self) {
        self.finished = true;
        self.state.close();
    }
}

#[async_trait]
impl AsyncFeedClient for CooperativeClient {
    async fn connect(addr: &str, options: ClientOptions) -> Result<Self, FeedError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| FeedError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        info!(addr = %addr, "Connected to upstream feed");

        Ok(Self {
            addr: addr.to_string(),
            options,
            state: SharedState::new(ClientState::Connected),
            writer: Arc::new(Mutex::new(write_half)),
            read_half: Some(read_half),
            items: None,
            tasks: Vec::new(),
            finished: false,
        })
    }

    async fn logon(&mut self, credentials: &Credentials) -> Result<(), FeedError> {
        self.state.require(ClientState::Connected, "log on")?;

        let request = Message::logon(
            &credentials.username,
            &credentials.password,
            self.options.advertised_heartbeat_secs,
            &self.options.client_name,
        );
        self.send(&request).await?;

        let read_half = self.read_half.take().ok_or(FeedError::InvalidState {
            operation: "log on",
            state: self.state.get(),
        })?;
        let heartbeat = encode(&Message::heartbeat())?;
        let (tx, rx) = mpsc::channel(self.options.message_queue_capacity.max(1));
        let weak_tx = tx.downgrade();

        let reader = tokio::spawn(read_loop(
            read_half,
            tx,
            self.options.clone(),
            self.state.clone(),
        ));
        let heartbeat_task = tokio::spawn(heartbeat_loop(
            Arc::clone(&self.writer),
            heartbeat,
            self.options.heartbeat_interval,
            self.state.clone(),
            weak_tx,
            reader.abort_handle(),
        ));
        self.tasks.push(reader);
        self.tasks.push(heartbeat_task);

        self.items = Some(rx);
        self.state.set(ClientState::LoggedOn);

        info!(
            addr = %self.addr,
            user = %credentials.username,
            heartbeat_secs = self.options.heartbeat_interval.as_secs_f64(),
            "Logon sent"
        );
        Ok(())
    }

    async fn send(&self, message: &Message) -> Result<(), FeedError> {
        self.state.require_open("send")?;
        let frame = encode(message)?;
        self.writer.lock().await.write_all(&frame).await?;
        debug!(message_type = %message.message_type(), bytes = frame.len(), "Sent message");
        Ok(())
    }

    async fn recv(&mut self) -> Option<FeedItem> {
        if self.finished {
            return None;
        }
        let Some(items) = self.items.as_mut() else {
            self.finished = true;
            return Some(Err(FeedError::InvalidState {
                operation: "receive",
                state: self.state.get(),
            }));
        };

        match items.recv().await {
            Some(item) => {
                if matches!(&item, Err(e) if e.is_fatal()) {
                    self.finish();
                }
                Some(item)
            }
            None => {
                self.finish();
                None
            }
        }
    }

    async fn close(&mut self) {
        let previous = self.state.close();
        self.finished = true;
        if previous == ClientState::Closed && self.tasks.is_empty() {
            return;
        }

        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!(error = %e, "Socket shutdown failed");
        }
        // Dropping the pending read is how the reader task is cancelled.
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.items = None;
        self.read_half = None;
        info!(addr = %self.addr, "Feed client closed");
    }

    fn state(&self) -> ClientState {
        self.state.get()
    }
}

impl Drop for CooperativeClient {
    fn drop(&mut self) {
        self.state.close();
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn read_loop(
    read_half: OwnedReadHalf,
    items: mpsc::Sender<FeedItem>,
    options: ClientOptions,
    state: SharedState,
) {
    let mut frames = FramedRead::with_capacity(read_half, FrameCodec::new(), options.read_chunk_size);
    let mut count = 0u64;

    while let Some(next) = frames.next().await {
        match next {
            Ok(frame) => {
                count += 1;
                if let Some(item) = deliver(frame, &options) {
                    if items.send(item).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                if state.get() != ClientState::Closed {
                    warn!(error = %e, "Upstream read failed");
                    let _ = items.send(Err(FeedError::Connection(e))).await;
                }
                return;
            }
        }
    }
    info!(frames = count, "Upstream closed the connection");
}

async fn heartbeat_loop(
    writer: Writer,
    frame: Vec<u8>,
    period: Duration,
    state: SharedState,
    items: mpsc::WeakSender<FeedItem>,
    reader: AbortHandle,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if state.get() != ClientState::LoggedOn || reader.is_finished() {
            break;
        }

        let result = writer.lock().await.write_all(&frame).await;
        match result {
            Ok(()) => debug!("Heartbeat sent"),
            Err(e) => {
                if state.close() == ClientState::LoggedOn {
                    error!(error = %e, "Heartbeat send failed, closing feed");
                    if let Some(items) = items.upgrade() {
                        let _ = items.send(Err(FeedError::HeartbeatFailure(e))).await;
                    }
                    reader.abort();
                }
                break;
            }
        }
    }
    debug!("Heartbeat stopped");
}
