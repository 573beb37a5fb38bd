//! Loopback upstream used by the client tests.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use feed_client::codec::{Frames, DELIMITER};
use feed_types::message::Message;

/// A fake server that accepts one connection and runs `script` on it.
pub struct FakeUpstream {
    pub addr: String,
    handle: JoinHandle<Vec<Message>>,
}

impl FakeUpstream {
    /// `script` gets the accepted socket and returns the messages it read.
    pub fn spawn<F>(script: F) -> Self
    where
        F: FnOnce(TcpStream) -> Vec<Message> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            script(socket)
        });
        Self { addr, handle }
    }

    pub fn join(self) -> Vec<Message> {
        self.handle.join().unwrap()
    }
}

/// Read frames until `count` messages have arrived (or the peer goes away).
pub fn read_messages(socket: &TcpStream, count: usize) -> Vec<Message> {
    let reader = socket.try_clone().unwrap();
    Frames::with_chunk_size(reader, 1)
        .take(count)
        .map(|frame| Message::from_slice(&frame).unwrap())
        .collect()
}

pub fn write_frames(socket: &mut TcpStream, payloads: &[&str]) {
    for payload in payloads {
        socket.write_all(payload.as_bytes()).unwrap();
        socket.write_all(&[DELIMITER]).unwrap();
    }
    socket.flush().unwrap();
}

/// Block until the client hangs up.
pub fn drain(mut socket: TcpStream) {
    let mut buf = [0u8; 256];
    while let Ok(n) = socket.read(&mut buf) {
        if n == 0 {
            break;
        }
    }
}

pub const TRADE: &str =
    r#"{"Type":112,"SymbolID":1,"Price":4000.25,"Volume":2,"DateTime":1601481600,"AtBidOrAsk":1}"#;
pub const HEARTBEAT: &str = r#"{"Type":3}"#;
pub const LOGON_OK: &str = r#"{"Type":2,"ProtocolVersion":8,"Result":1,"ResultText":"ok"}"#;
