//! Groups of TCP peers served by one sender and one receiver thread.
//!
//! An outbound group ([`PeerGroup::connect`]) is what a render client holds:
//! one connection per display node, each with a private inbox. A listening
//! group ([`PeerGroup::listen`]) is what a display node holds: it accepts
//! clients until the announced number have joined, and delivers everything
//! they send into one shared inbox.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::connection::{Connection, ConnectionReader, ConnectionWriter, Listener, Readiness};
use crate::error::NetError;
use crate::framing::{read_frame, write_frame};
use crate::message::{Message, PeerId};
use crate::queue::{FrameQueue, Inbox};

/// How long the receiver waits on one idle peer before moving to the next.
const POLL_INTERVAL: Duration = Duration::from_millis(2);
/// Time a freshly accepted client has to send its handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_POLL: Duration = Duration::from_millis(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
/// Successive ports tried when the requested listen port is taken.
pub const PORT_PROBE_ATTEMPTS: u16 = 64;

/// Connection state of a group as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupHealth {
    /// Still waiting for the expected number of peers.
    Connecting,
    Healthy,
    /// Some peers are gone; the rest are still served.
    Degraded { dead: Vec<PeerId> },
    /// Every peer is gone.
    Failed,
}

enum Inboxes {
    /// One private queue per remote (outbound groups).
    PerRemote(Vec<Arc<FrameQueue<Message>>>),
    /// Everything lands in one caller-supplied inbox (listening groups).
    Shared(Arc<dyn Inbox>),
}

struct Roster {
    expected: Option<usize>,
    connected: usize,
    ready: bool,
    failed: bool,
}

struct Shared {
    cookie: u64,
    outbox: FrameQueue<Message>,
    stop: Arc<AtomicBool>,
    roster: Mutex<Roster>,
    all_connected: Condvar,
    /// Written once, when the group is full.
    alive: OnceLock<Vec<AtomicBool>>,
    inboxes: Inboxes,
}

impl Shared {
    fn new(cookie: u64, inboxes: Inboxes) -> Self {
        Self {
            cookie,
            outbox: FrameQueue::unbounded(),
            stop: Arc::new(AtomicBool::new(false)),
            roster: Mutex::new(Roster {
                expected: None,
                connected: 0,
                ready: false,
                failed: false,
            }),
            all_connected: Condvar::new(),
            alive: OnceLock::new(),
            inboxes,
        }
    }

    fn roster(&self) -> MutexGuard<'_, Roster> {
        self.roster.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn is_alive(&self, peer: PeerId) -> bool {
        self.alive
            .get()
            .and_then(|alive| alive.get(peer.0))
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    fn peer_count(&self) -> usize {
        self.alive.get().map_or(0, Vec::len)
    }

    fn mark_ready(&self, peers: usize) {
        let _ = self
            .alive
            .set((0..peers).map(|_| AtomicBool::new(true)).collect());
        let mut roster = self.roster();
        roster.ready = true;
        drop(roster);
        self.all_connected.notify_all();
    }

    fn deliver(&self, peer: PeerId, msg: Message) {
        match &self.inboxes {
            Inboxes::PerRemote(queues) => {
                if let Some(queue) = queues.get(peer.0) {
                    queue.put(msg);
                }
            }
            Inboxes::Shared(inbox) => {
                inbox.put(msg);
            }
        }
    }

    /// Take a peer out of service. The group fails once none are left.
    fn peer_lost(&self, peer: PeerId, err: &NetError) {
        let Some(flag) = self.alive.get().and_then(|alive| alive.get(peer.0)) else {
            return;
        };
        if !flag.swap(false, Ordering::AcqRel) {
            return;
        }
        if self.stopping() {
            debug!("peer {} closed during shutdown: {}", peer.0, err);
        } else {
            warn!("peer {} lost: {}", peer.0, err);
        }
        if let Inboxes::PerRemote(queues) = &self.inboxes {
            if let Some(queue) = queues.get(peer.0) {
                queue.close();
            }
        }

        let all_dead = self
            .alive
            .get()
            .is_some_and(|alive| alive.iter().all(|f| !f.load(Ordering::Acquire)));
        if all_dead {
            if !self.stopping() {
                warn!("all peers lost, group failed");
            }
            self.roster().failed = true;
            if let Inboxes::Shared(inbox) = &self.inboxes {
                inbox.close();
            }
            self.all_connected.notify_all();
        }
    }
}

/// A set of connected peers sharing one outbound queue.
pub struct PeerGroup {
    shared: Arc<Shared>,
    threads: Arc<Mutex<Vec<JoinHandle<()>>>>,
    local_port: Option<u16>,
}

impl PeerGroup {
    /// Connect to every target, handshake, and wait for one welcome message
    /// from each before returning.
    ///
    /// `expected_peers` is the number of client processes the servers should
    /// wait for, this one included.
    pub fn connect(
        cookie: u64,
        expected_peers: i32,
        targets: &[(String, u16)],
    ) -> Result<Self, NetError> {
        let mut connections = Vec::with_capacity(targets.len());
        for (host, port) in targets {
            let mut conn = Connection::connect(host, *port)?;
            let writer = conn.writer();
            writer.write_u64(cookie)?;
            writer.write_i32(expected_peers)?;
            writer.flush()?;
            debug!("handshake sent to {}", conn.peer_addr());
            connections.push(conn);
        }

        let queues = (0..connections.len())
            .map(|_| Arc::new(FrameQueue::unbounded()))
            .collect();
        let shared = Arc::new(Shared::new(cookie, Inboxes::PerRemote(queues)));
        {
            let mut roster = shared.roster();
            roster.expected = Some(connections.len());
            roster.connected = connections.len();
        }
        let group = Self {
            shared: Arc::clone(&shared),
            threads: Arc::new(Mutex::new(Vec::new())),
            local_port: None,
        };
        let handles = start_loops(&shared, connections)?;
        group.lock_threads().extend(handles);
        shared.mark_ready(targets.len());

        // soft barrier
        for i in 0..targets.len() {
            match group.inbox(PeerId(i)).and_then(|inbox| inbox.get()) {
                Some(_) => debug!("welcome received from peer {}", i),
                None => return Err(NetError::PeerDisconnected),
            }
        }
        info!("connected to {} peers", targets.len());
        Ok(group)
    }

    /// Listen on `port` (or the next free port) and accept clients in the
    /// background until the number announced in their handshakes have joined.
    pub fn listen(cookie: u64, inbox: Arc<dyn Inbox>, port: u16) -> Result<Self, NetError> {
        let listener = Listener::bind_probing(port, PORT_PROBE_ATTEMPTS)?;
        listener.set_nonblocking(true)?;
        let local_port = listener.local_port();
        info!("peer group listening on port {}", local_port);

        let shared = Arc::new(Shared::new(cookie, Inboxes::Shared(inbox)));
        let threads = Arc::new(Mutex::new(Vec::new()));
        let accepter = {
            let shared = Arc::clone(&shared);
            let threads = Arc::clone(&threads);
            thread::Builder::new()
                .name("peer-accepter".into())
                .spawn(move || accept_loop(listener, shared, threads))?
        };
        threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(accepter);

        Ok(Self {
            shared,
            threads,
            local_port: Some(local_port),
        })
    }

    fn lock_threads(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until every expected peer has connected.
    pub fn wait_for_all_connected(&self) -> Result<(), NetError> {
        let mut roster = self.shared.roster();
        while !roster.ready {
            if self.shared.stopping() {
                return Err(NetError::Shutdown);
            }
            if roster.failed {
                return Err(NetError::PeerDisconnected);
            }
            roster = self
                .shared
                .all_connected
                .wait(roster)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(())
    }

    /// Like [`wait_for_all_connected`](Self::wait_for_all_connected) but
    /// gives up after `timeout`. Returns whether the group is complete.
    pub fn wait_for_all_connected_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut roster = self.shared.roster();
        while !roster.ready {
            let now = Instant::now();
            if now >= deadline || roster.failed || self.shared.stopping() {
                return false;
            }
            roster = self
                .shared
                .all_connected
                .wait_timeout(roster, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Queue `msg` for delivery to each of `peers`, in order.
    pub fn send_to(&self, peers: &[PeerId], mut msg: Message) -> Result<(), NetError> {
        if self.shared.stopping() {
            return Err(NetError::Shutdown);
        }
        if !self.shared.roster().ready {
            return Err(NetError::NotReady);
        }
        let count = self.shared.peer_count();
        let mut destinations = Vec::with_capacity(peers.len());
        for &peer in peers {
            if peer.0 < count {
                destinations.push(peer);
            } else {
                warn!("send to unknown peer {} ignored ({} peers)", peer.0, count);
            }
        }
        if destinations.is_empty() {
            return Ok(());
        }
        msg.set_destinations(destinations);
        if self.shared.outbox.put(msg) {
            Ok(())
        } else {
            Err(NetError::Shutdown)
        }
    }

    pub fn broadcast(&self, msg: Message) -> Result<(), NetError> {
        let all: Vec<PeerId> = (0..self.shared.peer_count()).map(PeerId).collect();
        self.send_to(&all, msg)
    }

    /// Private inbox of `peer`. Only outbound groups have these.
    pub fn inbox(&self, peer: PeerId) -> Option<Arc<FrameQueue<Message>>> {
        match &self.shared.inboxes {
            Inboxes::PerRemote(queues) => queues.get(peer.0).cloned(),
            Inboxes::Shared(_) => None,
        }
    }

    pub fn health(&self) -> GroupHealth {
        let roster = self.shared.roster();
        if roster.failed {
            return GroupHealth::Failed;
        }
        if !roster.ready {
            return GroupHealth::Connecting;
        }
        drop(roster);
        let dead: Vec<PeerId> = (0..self.shared.peer_count())
            .map(PeerId)
            .filter(|&p| !self.shared.is_alive(p))
            .collect();
        if dead.is_empty() {
            GroupHealth::Healthy
        } else {
            GroupHealth::Degraded { dead }
        }
    }

    pub fn is_alive(&self, peer: PeerId) -> bool {
        self.shared.is_alive(peer)
    }

    /// Number of peers once the group is complete; zero while connecting.
    pub fn peer_count(&self) -> usize {
        self.shared.peer_count()
    }

    /// Handshakes accepted so far (listening groups).
    pub fn connected_count(&self) -> usize {
        self.shared.roster().connected
    }

    /// Port a listening group is bound to.
    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    pub fn cookie(&self) -> u64 {
        self.shared.cookie
    }

    /// Stop accepting and receiving, let the sender flush what is queued,
    /// and join every thread.
    pub fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.outbox.close();
        // waiters re-check `stop` under the roster lock
        drop(self.shared.roster());
        self.shared.all_connected.notify_all();
        loop {
            let Some(handle) = self.lock_threads().pop() else {
                break;
            };
            if handle.join().is_err() {
                warn!("peer group thread panicked");
            }
        }
        if let Inboxes::PerRemote(queues) = &self.shared.inboxes {
            for queue in queues {
                queue.close();
            }
        }
    }
}

impl Drop for PeerGroup {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn start_loops(
    shared: &Arc<Shared>,
    connections: Vec<Connection>,
) -> Result<Vec<JoinHandle<()>>, NetError> {
    let mut readers = Vec::with_capacity(connections.len());
    let mut writers = Vec::with_capacity(connections.len());
    for conn in connections {
        let (mut reader, writer) = conn.split();
        reader.set_read_timeout(Some(POLL_INTERVAL))?;
        reader.attach_stop_flag(Arc::clone(&shared.stop));
        writer.set_write_timeout(Some(WRITE_TIMEOUT))?;
        readers.push(reader);
        writers.push(writer);
    }

    let sender = {
        let shared = Arc::clone(shared);
        thread::Builder::new()
            .name("peer-sender".into())
            .spawn(move || sender_loop(shared, writers))?
    };
    let receiver = {
        let shared = Arc::clone(shared);
        thread::Builder::new()
            .name("peer-receiver".into())
            .spawn(move || receiver_loop(shared, readers))?
    };
    Ok(vec![sender, receiver])
}

fn sender_loop(shared: Arc<Shared>, mut writers: Vec<ConnectionWriter>) {
    while let Some(msg) = shared.outbox.get() {
        for &peer in msg.destinations() {
            if !shared.is_alive(peer) {
                continue;
            }
            let Some(writer) = writers.get_mut(peer.0) else {
                continue;
            };
            if let Err(e) = write_frame(writer.stream_mut(), msg.bytes()) {
                shared.peer_lost(peer, &e);
            }
        }
    }
    debug!("sender loop exiting");
}

fn receiver_loop(shared: Arc<Shared>, mut readers: Vec<ConnectionReader>) {
    while !shared.stopping() {
        let mut any_alive = false;
        for (i, reader) in readers.iter_mut().enumerate() {
            let peer = PeerId(i);
            if !shared.is_alive(peer) {
                continue;
            }
            any_alive = true;
            match reader.poll_readable() {
                Ok(Readiness::Idle) => {}
                Ok(Readiness::Ready) => match read_frame(reader) {
                    Ok(bytes) => shared.deliver(peer, Message::new(bytes)),
                    Err(NetError::Shutdown) => return,
                    Err(e) => shared.peer_lost(peer, &e),
                },
                Err(e) => shared.peer_lost(peer, &e),
            }
        }
        if !any_alive {
            break;
        }
    }
    debug!("receiver loop exiting");
}

/// Read a client's handshake and check it against the group.
fn validate_handshake(conn: &mut Connection, shared: &Shared) -> Result<usize, NetError> {
    let reader = conn.reader();
    reader.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    let cookie = reader.read_u64()?;
    if cookie != shared.cookie {
        return Err(NetError::ProtocolMismatch(format!(
            "cookie {:#x} does not match session",
            cookie
        )));
    }
    let announced = reader.read_i32()?;
    if announced < 1 {
        return Err(NetError::ProtocolMismatch(format!(
            "peer count {} is not positive",
            announced
        )));
    }
    reader.set_read_timeout(None)?;
    Ok(announced as usize)
}

fn accept_loop(
    listener: Listener,
    shared: Arc<Shared>,
    threads: Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    let mut joined: Vec<Connection> = Vec::new();
    loop {
        if shared.stopping() {
            debug!("accepter stopping with {} peers joined", joined.len());
            return;
        }
        let mut conn = match listener.try_accept() {
            Ok(Some(conn)) => conn,
            Ok(None) => {
                thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(e) => {
                warn!("accept failed: {}", e);
                thread::sleep(ACCEPT_POLL);
                continue;
            }
        };

        let addr = conn.peer_addr();
        let announced = match validate_handshake(&mut conn, &shared) {
            Ok(n) => n,
            Err(e) => {
                warn!("rejected connection from {}: {}", addr, e);
                conn.close();
                continue;
            }
        };

        let expected = {
            let mut roster = shared.roster();
            match roster.expected {
                Some(n) if n != announced => {
                    drop(roster);
                    warn!(
                        "rejected connection from {}: announced {} peers, group expects {}",
                        addr, announced, n
                    );
                    conn.close();
                    continue;
                }
                Some(n) => n,
                None => {
                    roster.expected = Some(announced);
                    announced
                }
            }
        };

        joined.push(conn);
        shared.roster().connected = joined.len();
        info!("peer {} joined from {} ({}/{})", joined.len() - 1, addr, joined.len(), expected);

        if joined.len() == expected {
            break;
        }
    }

    let mut threads = threads.lock().unwrap_or_else(PoisonError::into_inner);
    if shared.stopping() {
        return;
    }
    match start_loops(&shared, joined) {
        Ok(handles) => {
            threads.extend(handles);
            drop(threads);
            let peers = shared.roster().connected;
            shared.mark_ready(peers);
            info!("all peers connected");
        }
        Err(e) => {
            warn!("failed to start peer loops: {}", e);
            shared.roster().failed = true;
            shared.all_connected.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::StampedFrameQueue;

    #[test]
    fn send_before_ready_is_refused() {
        let inbox: Arc<dyn Inbox> = Arc::new(StampedFrameQueue::new());
        let group = PeerGroup::listen(1, inbox, 0).unwrap();
        assert_eq!(group.health(), GroupHealth::Connecting);
        assert!(matches!(
            group.broadcast(Message::new(vec![0; 4])),
            Err(NetError::NotReady)
        ));
        group.shutdown();
        assert!(matches!(
            group.broadcast(Message::new(vec![0; 4])),
            Err(NetError::Shutdown)
        ));
    }

    #[test]
    fn shutdown_wakes_connection_waiters() {
        let inbox: Arc<dyn Inbox> = Arc::new(FrameQueue::unbounded());
        let group = Arc::new(PeerGroup::listen(1, inbox, 0).unwrap());
        let waiter = {
            let group = Arc::clone(&group);
            thread::spawn(move || group.wait_for_all_connected())
        };
        thread::sleep(Duration::from_millis(20));
        group.shutdown();
        assert!(matches!(waiter.join().unwrap(), Err(NetError::Shutdown)));
    }
}
