//! Threaded feed client
//!
//! Three workers run once the client is logged on:
//!
//! - reader: pulls chunks off the socket into the byte queue
//! - framer: splits chunks into frames and pushes items to the item queue
//! - heartbeat: sends a heartbeat every `heartbeat_interval`
//!
//! End of stream travels through both queues as a sentinel (an empty chunk,
//! then `None`), so the caller sees every frame that arrived before the
//! connection dropped. `close` shuts the socket down, which unblocks the
//! reader, drops the item receiver, which unblocks the framer, and drops the
//! heartbeat's stop sender, which wakes the heartbeat mid-interval.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::BytesMut;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use feed_types::message::Message;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::client::{
    deliver, ClientOptions, ClientState, Credentials, FeedClient, FeedError, FeedItem, SharedState,
};
use crate::codec::{encode, FrameCodec};

type Chunk = io::Result<Vec<u8>>;
type Slot = Option<FeedItem>;

/// Feed client backed by OS threads and crossbeam queues.
pub struct BlockingClient {
    addr: String,
    options: ClientOptions,
    state: SharedState,
    /// Handle used for shutdown; never locked.
    socket: TcpStream,
    writer: Arc<Mutex<TcpStream>>,
    items: Option<Receiver<Slot>>,
    /// Dropped on close to stop the heartbeat.
    stop: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
    finished: bool,
}

impl BlockingClient {
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn finish(&mut self) {
        self.finished = true;
        self.state.close();
    }
}

impl FeedClient for BlockingClient {
    fn connect(addr: &str, options: ClientOptions) -> Result<Self, FeedError> {
        let socket = TcpStream::connect(addr).map_err(|source| FeedError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        socket.set_nodelay(true)?;
        let writer = socket.try_clone()?;

        info!(addr = %addr, "Connected to upstream feed");

        Ok(Self {
            addr: addr.to_string(),
            options,
            state: SharedState::new(ClientState::Connected),
            socket,
            writer: Arc::new(Mutex::new(writer)),
            items: None,
            stop: None,
            workers: Vec::new(),
            finished: false,
        })
    }

    fn logon(&mut self, credentials: &Credentials) -> Result<(), FeedError> {
        self.state.require(ClientState::Connected, "log on")?;

        let request = Message::logon(
            &credentials.username,
            &credentials.password,
            self.options.advertised_heartbeat_secs,
            &self.options.client_name,
        );
        self.send(&request)?;

        let (chunk_tx, chunk_rx) = bounded::<Chunk>(self.options.byte_queue_capacity);
        let (item_tx, item_rx) = bounded::<Slot>(self.options.message_queue_capacity);

        let reader = self.socket.try_clone()?;
        let chunk_size = self.options.read_chunk_size;
        self.workers.push(
            thread::Builder::new()
                .name("feed-reader".to_string())
                .spawn(move || read_loop(reader, chunk_size, chunk_tx))?,
        );

        let options = self.options.clone();
        let state = self.state.clone();
        let framer_tx = item_tx.clone();
        self.workers.push(
            thread::Builder::new()
                .name("feed-framer".to_string())
                .spawn(move || frame_loop(chunk_rx, framer_tx, options, state))?,
        );

        let heartbeat = encode(&Message::heartbeat())?;
        let writer = Arc::clone(&self.writer);
        let shutdown = self.socket.try_clone()?;
        let state = self.state.clone();
        let interval = self.options.heartbeat_interval;
        let (stop_tx, stop_rx) = bounded::<()>(0);
        self.workers.push(
            thread::Builder::new()
                .name("feed-heartbeat".to_string())
                .spawn(move || {
                    heartbeat_loop(writer, shutdown, heartbeat, interval, state, item_tx, stop_rx)
                })?,
        );

        self.stop = Some(stop_tx);
        self.items = Some(item_rx);
        self.state.set(ClientState::LoggedOn);

        info!(
            addr = %self.addr,
            user = %credentials.username,
            heartbeat_secs = interval.as_secs_f64(),
            "Logon sent"
        );
        Ok(())
    }

    fn send(&self, message: &Message) -> Result<(), FeedError> {
        self.state.require_open("send")?;
        let frame = encode(message)?;
        self.writer.lock().write_all(&frame)?;
        debug!(message_type = %message.message_type(), bytes = frame.len(), "Sent message");
        Ok(())
    }

    fn recv(&mut self) -> Option<FeedItem> {
        if self.finished {
            return None;
        }
        let Some(items) = self.items.as_ref() else {
            self.finished = true;
            return Some(Err(FeedError::InvalidState {
                operation: "receive",
                state: self.state.get(),
            }));
        };

        match items.recv() {
            Ok(Some(item)) => {
                if matches!(&item, Err(e) if e.is_fatal()) {
                    self.finish();
                }
                Some(item)
            }
            Ok(None) | Err(_) => {
                self.finish();
                None
            }
        }
    }

    fn close(&mut self) {
        let previous = self.state.close();
        self.finished = true;
        if previous == ClientState::Closed && self.workers.is_empty() {
            return;
        }

        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                debug!(error = %e, "Socket shutdown failed");
            }
        }
        self.items = None;
        self.stop = None;

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Feed worker panicked");
            }
        }
        info!(addr = %self.addr, "Feed client closed");
    }

    fn state(&self) -> ClientState {
        self.state.get()
    }
}

impl Drop for BlockingClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_loop(mut stream: TcpStream, chunk_size: usize, chunks: Sender<Chunk>) {
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => {
                info!("Upstream closed the connection");
                break;
            }
            Ok(n) => {
                if chunks.send(Ok(buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = chunks.send(Err(e));
                return;
            }
        }
    }
    let _ = chunks.send(Ok(Vec::new()));
}

fn frame_loop(chunks: Receiver<Chunk>, items: Sender<Slot>, options: ClientOptions, state: SharedState) {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::with_capacity(options.read_chunk_size);
    let mut frames = 0u64;

    'read: loop {
        let chunk = match chunks.recv() {
            Ok(Ok(chunk)) if !chunk.is_empty() => chunk,
            Ok(Ok(_)) | Err(_) => break,
            Ok(Err(e)) => {
                // Our own close also fails the read; only report drops we did not cause.
                if state.get() != ClientState::Closed {
                    warn!(error = %e, "Upstream read failed");
                    let _ = items.send(Some(Err(FeedError::Connection(e))));
                }
                break;
            }
        };

        buf.extend_from_slice(&chunk);
        while let Some(frame) = codec.next_frame(&mut buf) {
            frames += 1;
            if let Some(item) = deliver(frame, &options) {
                if items.send(Some(item)).is_err() {
                    break 'read;
                }
            }
        }
    }

    if !buf.is_empty() {
        debug!(bytes = buf.len(), "Discarding unterminated trailing frame");
    }
    debug!(frames, "Framer stopped");
    let _ = items.send(None);
}

fn heartbeat_loop(
    writer: Arc<Mutex<TcpStream>>,
    shutdown: TcpStream,
    frame: Vec<u8>,
    interval: Duration,
    state: SharedState,
    items: Sender<Slot>,
    stop: Receiver<()>,
) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if state.get() != ClientState::LoggedOn {
            break;
        }

        let result = writer.lock().write_all(&frame);
        match result {
            Ok(()) => debug!("Heartbeat sent"),
            Err(e) => {
                if state.close() == ClientState::LoggedOn {
                    error!(error = %e, "Heartbeat send failed, closing feed");
                    // Report before shutting down so the error precedes end-of-stream.
                    let _ = items.send(Some(Err(FeedError::HeartbeatFailure(e))));
                    let _ = shutdown.shutdown(Shutdown::Both);
                }
                break;
            }
        }
    }
    debug!("Heartbeat stopped");
}
