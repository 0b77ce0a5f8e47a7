#![allow(dead_code)]
//! Test harness utilities for tilewall-net integration tests.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tilewall_net::framing::{read_frame, write_frame};
use tilewall_net::{Connection, FrameQueue, Inbox, Message, NetError, PeerGroup};

pub const COOKIE: u64 = 0x7113_3a11_0000_0001;
pub const WELCOME: [u8; 13] = [0; 13];

/// A client speaking the wire protocol by hand, for poking at a listening group.
pub struct RawClient {
    conn: Connection,
}

impl RawClient {
    pub fn connect(port: u16) -> Result<Self, NetError> {
        Ok(Self {
            conn: Connection::connect("127.0.0.1", port)?,
        })
    }

    pub fn handshake(&mut self, cookie: u64, expected_peers: i32) -> Result<(), NetError> {
        let w = self.conn.writer();
        w.write_u64(cookie)?;
        w.write_i32(expected_peers)?;
        w.flush()
    }

    pub fn send(&mut self, payload: &[u8]) -> Result<(), NetError> {
        write_frame(self.conn.writer().stream_mut(), payload)
    }

    pub fn recv(&mut self) -> Result<Vec<u8>, NetError> {
        read_frame(self.conn.reader())
    }

    pub fn close(self) {
        self.conn.close();
    }
}

/// A listening group feeding a plain FIFO inbox.
pub fn listening_group() -> (PeerGroup, Arc<FrameQueue<Message>>, u16) {
    let inbox = Arc::new(FrameQueue::unbounded());
    let shared: Arc<dyn Inbox> = inbox.clone();
    let group = PeerGroup::listen(COOKIE, shared, 0).unwrap();
    let port = group.local_port().unwrap();
    (group, inbox, port)
}

/// Connect an outbound group to `ports` on a background thread. The thread
/// finishes only after every server has sent its welcome.
pub fn spawn_connect(
    expected_peers: i32,
    ports: &[u16],
) -> JoinHandle<Result<PeerGroup, NetError>> {
    let targets: Vec<(String, u16)> = ports.iter().map(|p| ("127.0.0.1".to_string(), *p)).collect();
    thread::spawn(move || PeerGroup::connect(COOKIE, expected_peers, &targets))
}

/// Wait for all clients, then send each the welcome message.
pub fn welcome_all(server: &PeerGroup) {
    server.wait_for_all_connected().unwrap();
    server.broadcast(Message::new(WELCOME.to_vec())).unwrap();
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub fn tagged(tag: u8) -> Message {
    Message::new(vec![tag; 8])
}
