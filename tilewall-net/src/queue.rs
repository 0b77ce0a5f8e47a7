//! Blocking message queues.
//!
//! [`FrameQueue`] is a FIFO over a crossbeam channel that can be closed from
//! the receiving side. [`StampedFrameQueue`] wraps one and releases only
//! messages that belong to the frame currently being assembled, holding back
//! messages for later frames and dropping those for earlier ones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, SendTimeoutError, Sender};
use log::{debug, warn};
use tilewall_types::FrameId;

use crate::message::Message;

/// How often a `put` blocked on a full queue looks for `close`.
const PUT_POLL: Duration = Duration::from_millis(50);

/// Where a receiver loop delivers incoming messages.
pub trait Inbox: Send + Sync {
    /// Deliver a message. Returns false if the inbox is closed.
    fn put(&self, msg: Message) -> bool;
    /// Block for the next message; `None` once closed and drained.
    fn get(&self) -> Option<Message>;
    fn get_timeout(&self, timeout: Duration) -> Option<Message>;
    /// Wake all waiters and refuse further messages.
    fn close(&self);
}

/// Blocking FIFO, optionally bounded.
///
/// Closing drops the queue's sender, so receivers drain what is left and
/// then see the channel disconnect.
pub struct FrameQueue<T = Message> {
    sender: Mutex<Option<Sender<T>>>,
    receiver: Receiver<T>,
}

impl<T> FrameQueue<T> {
    pub fn unbounded() -> Self {
        Self::from_channel(unbounded())
    }

    /// `put` blocks while `capacity` items are queued.
    pub fn bounded(capacity: usize) -> Self {
        Self::from_channel(bounded(capacity.max(1)))
    }

    fn from_channel((sender, receiver): (Sender<T>, Receiver<T>)) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
        }
    }

    fn lock_sender(&self) -> MutexGuard<'_, Option<Sender<T>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item`. Returns false (dropping the item) if the queue is
    /// closed, including while waiting for room.
    pub fn put(&self, item: T) -> bool {
        let Some(sender) = self.lock_sender().clone() else {
            return false;
        };
        let mut item = item;
        loop {
            match sender.send_timeout(item, PUT_POLL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(back)) => {
                    if self.is_closed() {
                        return false;
                    }
                    item = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    /// Block until an item is available. After `close` the remaining items
    /// are still handed out, then `None`.
    pub fn get(&self) -> Option<T> {
        self.receiver.recv().ok()
    }

    pub fn get_timeout(&self, timeout: Duration) -> Option<T> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn close(&self) {
        self.lock_sender().take();
    }

    pub fn is_closed(&self) -> bool {
        self.lock_sender().is_none()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Inbox for FrameQueue<Message> {
    fn put(&self, msg: Message) -> bool {
        FrameQueue::put(self, msg)
    }

    fn get(&self) -> Option<Message> {
        FrameQueue::get(self)
    }

    fn get_timeout(&self, timeout: Duration) -> Option<Message> {
        FrameQueue::get_timeout(self, timeout)
    }

    fn close(&self) {
        FrameQueue::close(self)
    }
}

struct Stamp {
    active: Option<FrameId>,
    held: Vec<Message>,
}

/// Inbox that only releases messages for the active frame.
///
/// Lock order is `stamp` then the live queue's own lock; `get` takes only
/// the latter, so consumers never wait on a producer re-sorting `held`.
pub struct StampedFrameQueue {
    stamp: Mutex<Stamp>,
    live: FrameQueue<Message>,
    stale_dropped: AtomicU64,
}

impl Default for StampedFrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl StampedFrameQueue {
    pub fn new() -> Self {
        Self {
            stamp: Mutex::new(Stamp {
                active: None,
                held: Vec::new(),
            }),
            live: FrameQueue::unbounded(),
            stale_dropped: AtomicU64::new(0),
        }
    }

    fn lock_stamp(&self) -> MutexGuard<'_, Stamp> {
        self.stamp.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn route(&self, stamp: &mut Stamp, msg: Message) -> bool {
        let Some(frame) = msg.frame_id() else {
            warn!("dropping {}-byte message without a tile header", msg.len());
            return false;
        };
        match stamp.active {
            Some(active) if frame < active => {
                self.stale_dropped.fetch_add(1, Ordering::Relaxed);
                debug!("stale tile for frame {} (active {}) dropped", frame, active);
                false
            }
            Some(active) if frame == active => self.live.put(msg),
            _ => {
                stamp.held.push(msg);
                true
            }
        }
    }

    /// Make `frame` the active frame and release held messages that belong
    /// to it, in arrival order.
    pub fn start_new_frame(&self, frame: FrameId) {
        let mut stamp = self.lock_stamp();
        stamp.active = Some(frame);
        let held = std::mem::take(&mut stamp.held);
        for msg in held {
            self.route(&mut stamp, msg);
        }
    }

    pub fn active_frame(&self) -> Option<FrameId> {
        self.lock_stamp().active
    }

    /// Messages waiting for a later frame.
    pub fn held_len(&self) -> usize {
        self.lock_stamp().held.len()
    }

    /// Messages ready for the active frame.
    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    /// Messages discarded because their frame had already been assembled.
    pub fn stale_dropped(&self) -> u64 {
        self.stale_dropped.load(Ordering::Relaxed)
    }
}

impl Inbox for StampedFrameQueue {
    fn put(&self, msg: Message) -> bool {
        if self.live.is_closed() {
            return false;
        }
        let mut stamp = self.lock_stamp();
        self.route(&mut stamp, msg)
    }

    fn get(&self) -> Option<Message> {
        self.live.get()
    }

    fn get_timeout(&self, timeout: Duration) -> Option<Message> {
        self.live.get_timeout(timeout)
    }

    fn close(&self) {
        self.live.close();
        self.lock_stamp().held.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::Arc;
    use std::thread;

    fn tile_msg(frame: FrameId, tag: u8) -> Message {
        let mut bytes = frame.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 20]);
        bytes.push(tag);
        Message::new(bytes)
    }

    fn tag(msg: &Message) -> u8 {
        msg.bytes()[24]
    }

    #[test]
    fn fifo_order() {
        let q = FrameQueue::unbounded();
        for i in 0..5 {
            q.put(i);
        }
        let got: Vec<i32> = (0..5).filter_map(|_| q.get()).collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn get_blocks_until_put() {
        let q = Arc::new(FrameQueue::unbounded());
        let q2 = Arc::clone(&q);
        let consumer = thread::spawn(move || q2.get());
        thread::sleep(Duration::from_millis(20));
        q.put(99);
        assert_eq!(consumer.join().unwrap(), Some(99));
    }

    #[test]
    fn close_drains_then_ends() {
        let q = FrameQueue::unbounded();
        q.put(1);
        q.close();
        assert!(!q.put(2));
        assert_eq!(q.get(), Some(1));
        assert_eq!(q.get(), None);
    }

    #[test]
    fn bounded_put_waits_for_room() {
        let q = Arc::new(FrameQueue::bounded(1));
        q.put(1);
        let q2 = Arc::clone(&q);
        let producer = thread::spawn(move || q2.put(2));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(q.len(), 1);
        assert_eq!(q.get(), Some(1));
        assert!(producer.join().unwrap());
        assert_eq!(q.get(), Some(2));
    }

    #[test]
    fn close_wakes_a_full_put() {
        let q = Arc::new(FrameQueue::bounded(1));
        q.put(1);
        let q2 = Arc::clone(&q);
        let producer = thread::spawn(move || q2.put(2));
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert!(!producer.join().unwrap());
        assert_eq!(q.get(), Some(1));
        assert_eq!(q.get(), None);
    }

    #[test]
    fn get_timeout_expires() {
        let q: FrameQueue<u8> = FrameQueue::unbounded();
        assert_eq!(q.get_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn future_frame_is_held_until_active() {
        let q = StampedFrameQueue::new();
        q.start_new_frame(3);
        Inbox::put(&q, tile_msg(5, 1));
        assert_eq!(q.held_len(), 1);
        assert!(Inbox::get_timeout(&q, Duration::from_millis(10)).is_none());

        q.start_new_frame(4);
        assert!(Inbox::get_timeout(&q, Duration::from_millis(10)).is_none());
        assert_eq!(q.held_len(), 1);

        q.start_new_frame(5);
        let msg = Inbox::get_timeout(&q, Duration::from_millis(100)).unwrap();
        assert_eq!(msg.frame_id(), Some(5));
        assert_eq!(q.held_len(), 0);
    }

    #[test]
    fn past_frame_is_never_released() {
        let q = StampedFrameQueue::new();
        q.start_new_frame(5);
        Inbox::put(&q, tile_msg(2, 0));
        assert_eq!(q.stale_dropped(), 1);
        assert_eq!(q.held_len(), 0);
        q.start_new_frame(6);
        assert!(Inbox::get_timeout(&q, Duration::from_millis(10)).is_none());
    }

    #[test]
    fn held_messages_keep_arrival_order() {
        let q = StampedFrameQueue::new();
        q.start_new_frame(0);
        Inbox::put(&q, tile_msg(1, 10));
        Inbox::put(&q, tile_msg(2, 20));
        Inbox::put(&q, tile_msg(1, 11));
        Inbox::put(&q, tile_msg(1, 12));

        q.start_new_frame(1);
        let tags: Vec<u8> = (0..3)
            .map(|_| tag(&Inbox::get_timeout(&q, Duration::from_millis(100)).unwrap()))
            .collect();
        assert_eq!(tags, vec![10, 11, 12]);
        assert_eq!(q.held_len(), 1);
    }

    #[test]
    fn messages_before_first_frame_are_held() {
        let q = StampedFrameQueue::new();
        Inbox::put(&q, tile_msg(0, 7));
        assert_eq!(q.live_len(), 0);
        q.start_new_frame(0);
        assert_eq!(tag(&Inbox::get(&q).unwrap()), 7);
    }

    #[test]
    fn headerless_message_is_dropped() {
        let q = StampedFrameQueue::new();
        q.start_new_frame(0);
        assert!(!Inbox::put(&q, Message::new(vec![1, 2])));
        assert_eq!(q.live_len() + q.held_len(), 0);
    }

    fn numbered_msg(frame: FrameId, producer: u8, seq: u32) -> Message {
        let mut bytes = frame.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 20]);
        bytes.push(producer);
        bytes.extend_from_slice(&seq.to_le_bytes());
        Message::new(bytes)
    }

    fn numbering(msg: &Message) -> (u8, u32) {
        let b = msg.bytes();
        (b[24], u32::from_le_bytes([b[25], b[26], b[27], b[28]]))
    }

    #[test]
    fn concurrent_producers_only_release_the_active_frame() {
        const PRODUCERS: u8 = 4;
        const PER_PRODUCER: u32 = 500;
        const FRAMES: FrameId = 20;

        let q = Arc::new(StampedFrameQueue::new());
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|id| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    for seq in 0..PER_PRODUCER {
                        let frame = rng.gen_range(0..FRAMES);
                        Inbox::put(&*q, numbered_msg(frame, id, seq));
                        if rng.gen_ratio(1, 50) {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let mut received = 0u64;
        let mut last_seq = vec![None::<u32>; PRODUCERS as usize];
        for frame in 0..FRAMES {
            q.start_new_frame(frame);
            last_seq.iter_mut().for_each(|s| *s = None);
            while let Some(msg) = Inbox::get_timeout(&*q, Duration::from_millis(5)) {
                assert_eq!(msg.frame_id(), Some(frame));
                let (id, seq) = numbering(&msg);
                let last = &mut last_seq[id as usize];
                assert!(last.map_or(true, |l| seq > l), "producer {} reordered", id);
                *last = Some(seq);
                received += 1;
            }
        }
        for p in producers {
            p.join().unwrap();
        }
        // late arrivals for the last frame are still live
        while let Some(msg) = Inbox::get_timeout(&*q, Duration::from_millis(5)) {
            assert_eq!(msg.frame_id(), Some(FRAMES - 1));
            received += 1;
        }

        let total = PRODUCERS as u64 * PER_PRODUCER as u64;
        assert_eq!(q.held_len(), 0);
        assert_eq!(received + q.stale_dropped(), total);
    }
}
