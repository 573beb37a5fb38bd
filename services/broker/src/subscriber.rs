//! Downstream subscribers
//!
//! Each accepted connection gets a bounded outbound queue and a delivery
//! thread that writes queued frames to the socket in FIFO order. A failed
//! write stops the thread; the broker notices on its next sweep.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

/// What to do when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Mark the lagging subscriber dead; it is dropped on the next sweep.
    #[default]
    Disconnect,
    /// Wait for queue space. Stalls ingestion behind the slowest subscriber.
    Block,
}

/// A delimiter-terminated frame shared by every queue it is pushed to.
pub type Frame = Arc<[u8]>;

/// Result of offering a frame to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue full under `OverflowPolicy::Disconnect`.
    Overflow,
    /// Delivery thread has stopped.
    Closed,
}

/// Sending half of a subscriber queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: Sender<Frame>,
}

impl Outbox {
    pub fn bounded(capacity: usize) -> (Self, Receiver<Frame>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn offer(&self, frame: &Frame, policy: OverflowPolicy) -> Delivery {
        match policy {
            OverflowPolicy::Disconnect => match self.tx.try_send(Arc::clone(frame)) {
                Ok(()) => Delivery::Queued,
                Err(TrySendError::Full(_)) => Delivery::Overflow,
                Err(TrySendError::Disconnected(_)) => Delivery::Closed,
            },
            OverflowPolicy::Block => match self.tx.send(Arc::clone(frame)) {
                Ok(()) => Delivery::Queued,
                Err(_) => Delivery::Closed,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// One downstream connection.
pub struct Subscriber {
    id: u64,
    peer: SocketAddr,
    outbox: Outbox,
    socket: TcpStream,
    worker: JoinHandle<()>,
    dead: bool,
}

impl Subscriber {
    /// Start delivering to `socket`.
    pub fn spawn(id: u64, socket: TcpStream, capacity: usize) -> io::Result<Self> {
        let peer = socket.peer_addr()?;
        let writer = socket.try_clone()?;
        let (outbox, queue) = Outbox::bounded(capacity);

        let worker = thread::Builder::new()
            .name(format!("subscriber-{}", id))
            .spawn(move || deliver_loop(id, writer, queue))?;

        info!(subscriber = id, peer = %peer, capacity, "Subscriber connected");
        Ok(Self {
            id,
            peer,
            outbox,
            socket,
            worker,
            dead: false,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn queued(&self) -> usize {
        self.outbox.len()
    }

    pub fn is_alive(&self) -> bool {
        !self.dead && !self.worker.is_finished()
    }

    /// Queue a frame, marking the subscriber dead if it cannot take it.
    pub fn push(&mut self, frame: &Frame, policy: OverflowPolicy) {
        if self.dead {
            return;
        }
        match self.outbox.offer(frame, policy) {
            Delivery::Queued => {}
            Delivery::Overflow => {
                warn!(
                    subscriber = self.id,
                    queued = self.outbox.len(),
                    "Subscriber queue full, disconnecting"
                );
                self.dead = true;
            }
            Delivery::Closed => {
                debug!(subscriber = self.id, "Subscriber delivery stopped");
                self.dead = true;
            }
        }
    }

    /// Close the connection and release the delivery thread.
    pub fn shutdown(self) {
        let Subscriber {
            id,
            socket,
            outbox,
            worker,
            ..
        } = self;
        let _ = socket.shutdown(Shutdown::Both);
        drop(outbox);
        if worker.join().is_err() {
            warn!(subscriber = id, "Delivery thread panicked");
        }
        info!(subscriber = id, "Subscriber removed");
    }
}

fn deliver_loop(id: u64, mut socket: TcpStream, queue: Receiver<Frame>) {
    let mut delivered = 0u64;
    for frame in queue.iter() {
        if let Err(e) = socket.write_all(&frame) {
            warn!(subscriber = id, error = %e, delivered, "Delivery failed");
            break;
        }
        delivered += 1;
    }
    let _ = socket.shutdown(Shutdown::Both);
    debug!(subscriber = id, delivered, "Delivery thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> Frame {
        Arc::from(text.as_bytes())
    }

    #[test]
    fn test_disconnect_policy_reports_overflow() {
        let (outbox, _queue) = Outbox::bounded(2);
        assert_eq!(outbox.offer(&frame("a"), OverflowPolicy::Disconnect), Delivery::Queued);
        assert_eq!(outbox.offer(&frame("b"), OverflowPolicy::Disconnect), Delivery::Queued);
        assert_eq!(outbox.offer(&frame("c"), OverflowPolicy::Disconnect), Delivery::Overflow);
        assert_eq!(outbox.len(), 2);
    }

    #[test]
    fn test_closed_queue_under_both_policies() {
        let (outbox, queue) = Outbox::bounded(2);
        drop(queue);
        assert_eq!(outbox.offer(&frame("a"), OverflowPolicy::Disconnect), Delivery::Closed);
        assert_eq!(outbox.offer(&frame("a"), OverflowPolicy::Block), Delivery::Closed);
    }

    #[test]
    fn test_block_policy_waits_for_space() {
        let (outbox, queue) = Outbox::bounded(1);
        assert_eq!(outbox.offer(&frame("a"), OverflowPolicy::Block), Delivery::Queued);

        let consumer = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(20));
            let first = queue.recv().unwrap();
            let second = queue.recv().unwrap();
            (first, second)
        });

        assert_eq!(outbox.offer(&frame("b"), OverflowPolicy::Block), Delivery::Queued);
        let (first, second) = consumer.join().unwrap();
        assert_eq!(&first[..], b"a");
        assert_eq!(&second[..], b"b");
    }

    #[test]
    fn test_frames_are_shared_not_copied() {
        let (outbox, queue) = Outbox::bounded(4);
        let shared = frame("payload");
        outbox.offer(&shared, OverflowPolicy::Disconnect);
        let received = queue.recv().unwrap();
        assert!(Arc::ptr_eq(&shared, &received));
    }
}
