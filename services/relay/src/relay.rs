//! Relay accept loop and directional copy workers
//!
//! A pair is one downstream socket, one upstream socket and two copy
//! threads. When either direction hits end-of-stream or an error it shuts
//! down both sockets, which also ends the sibling's pending read. The accept
//! loop sweeps the pair list before every accept and drops only pairs whose
//! two workers have both returned; a pair with one worker still running is
//! kept until that worker returns as well.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_addr: String,
    pub upstream_addr: String,
    /// Bytes read per copy step.
    pub buffer_size: usize,
}

impl RelayConfig {
    pub fn new(listen_addr: impl Into<String>, upstream_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            upstream_addr: upstream_addr.into(),
            buffer_size: 2048,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    DownstreamToUpstream,
    UpstreamToDownstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::DownstreamToUpstream => f.write_str("down->up"),
            Direction::UpstreamToDownstream => f.write_str("up->down"),
        }
    }
}

struct Pair {
    id: u64,
    peer: SocketAddr,
    workers: [JoinHandle<u64>; 2],
}

impl Pair {
    fn is_finished(&self) -> bool {
        self.workers.iter().all(JoinHandle::is_finished)
    }
}

pub struct Relay {
    config: RelayConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    pairs: Mutex<Vec<Pair>>,
    next_id: AtomicU64,
}

impl Relay {
    pub fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        let listener =
            TcpListener::bind(&config.listen_addr).map_err(|source| RelayError::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            upstream = %config.upstream_addr,
            buffer_size = config.buffer_size,
            "Relay listening"
        );

        Ok(Self {
            config,
            listener,
            local_addr,
            pairs: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Pairs currently held, finished or not.
    pub fn pair_count(&self) -> usize {
        self.pairs.lock().len()
    }

    /// Accept and relay connections forever. Accept errors are logged and
    /// the loop keeps going.
    pub fn run(&self) {
        loop {
            self.sweep();
            match self.listener.accept() {
                Ok((downstream, peer)) => self.open_pair(downstream, peer),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => warn!(error = %e, "Accept failed"),
            }
        }
    }

    /// Drop pairs whose two workers have both returned. Returns how many.
    pub fn sweep(&self) -> usize {
        let mut pairs = self.pairs.lock();
        let before = pairs.len();
        let mut kept = Vec::with_capacity(before);
        for pair in pairs.drain(..) {
            if !pair.is_finished() {
                kept.push(pair);
                continue;
            }
            let [up, down] = pair.workers;
            let sent = up.join().unwrap_or(0);
            let received = down.join().unwrap_or(0);
            info!(pair = pair.id, peer = %pair.peer, sent, received, "Pair closed");
        }
        *pairs = kept;
        before - pairs.len()
    }

    fn open_pair(&self, downstream: TcpStream, peer: SocketAddr) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let upstream = match TcpStream::connect(&self.config.upstream_addr) {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!(
                    pair = id,
                    peer = %peer,
                    upstream = %self.config.upstream_addr,
                    error = %e,
                    "Upstream connect failed, closing downstream"
                );
                let _ = downstream.shutdown(Shutdown::Both);
                return;
            }
        };

        match self.spawn_workers(id, downstream, upstream) {
            Ok(workers) => {
                info!(pair = id, peer = %peer, "Pair opened");
                self.pairs.lock().push(Pair { id, peer, workers });
            }
            Err(e) => warn!(pair = id, error = %e, "Cannot start pair"),
        }
    }

    fn spawn_workers(
        &self,
        id: u64,
        downstream: TcpStream,
        upstream: TcpStream,
    ) -> io::Result<[JoinHandle<u64>; 2]> {
        let size = self.config.buffer_size.max(1);

        let (from, to) = (downstream.try_clone()?, upstream.try_clone()?);
        let up = thread::Builder::new()
            .name(format!("relay-{}-up", id))
            .spawn(move || copy(id, Direction::DownstreamToUpstream, from, to, size))?;

        let down = thread::Builder::new()
            .name(format!("relay-{}-down", id))
            .spawn(move || copy(id, Direction::UpstreamToDownstream, upstream, downstream, size))?;

        Ok([up, down])
    }
}

/// Copy bytes until `from` ends or either side fails, then close both.
fn copy(id: u64, direction: Direction, mut from: TcpStream, mut to: TcpStream, size: usize) -> u64 {
    let mut buf = vec![0u8; size];
    let mut total = 0u64;

    loop {
        match from.read(&mut buf) {
            Ok(0) => {
                debug!(pair = id, %direction, total, "End of stream");
                break;
            }
            Ok(n) => {
                if let Err(e) = to.write_all(&buf[..n]) {
                    debug!(pair = id, %direction, error = %e, "Write failed");
                    break;
                }
                total += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(pair = id, %direction, error = %e, "Read failed");
                break;
            }
        }
    }

    let _ = from.shutdown(Shutdown::Both);
    let _ = to.shutdown(Shutdown::Both);
    total
}
