//! Rank-to-rank messaging among the processes that drive one wall.
//!
//! [`ProcessGroup`] is the seam: ranks exchange opaque byte messages
//! point to point and meet at barriers. [`LocalGroup`] implements it for
//! ranks running as threads of one process.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::error::GroupError;

/// Point-to-point messaging and barriers among a fixed set of ranks.
pub trait ProcessGroup: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    /// Send `bytes` to `to`. Messages between two ranks arrive in order.
    fn send(&self, to: usize, bytes: Vec<u8>) -> Result<(), GroupError>;
    /// Block for the next message from `from`.
    fn recv(&self, from: usize) -> Result<Vec<u8>, GroupError>;
    /// Like `recv`, but `Ok(None)` if nothing arrived within `timeout`.
    fn recv_timeout(&self, from: usize, timeout: Duration) -> Result<Option<Vec<u8>>, GroupError>;
    /// Block until every rank has entered the barrier.
    fn barrier(&self) -> Result<(), GroupError>;
    /// Tear the group down: pending and future barriers fail with `Closed`.
    fn close(&self);
}

struct BarrierState {
    waiting: usize,
    generation: u64,
    closed: bool,
}

struct GroupShared {
    size: usize,
    barrier: Mutex<BarrierState>,
    released: Condvar,
}

impl GroupShared {
    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.barrier.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One rank's handle onto a group of in-process ranks.
pub struct LocalGroup {
    rank: usize,
    /// `outgoing[j]` delivers to rank j.
    outgoing: Vec<Sender<Vec<u8>>>,
    /// `incoming[j]` carries messages from rank j.
    incoming: Vec<Receiver<Vec<u8>>>,
    shared: Arc<GroupShared>,
}

impl LocalGroup {
    /// Build `size` connected handles, indexed by rank.
    pub fn create(size: usize) -> Vec<LocalGroup> {
        let shared = Arc::new(GroupShared {
            size,
            barrier: Mutex::new(BarrierState {
                waiting: 0,
                generation: 0,
                closed: false,
            }),
            released: Condvar::new(),
        });

        // channels[from][to]
        let mut senders: Vec<Vec<Sender<Vec<u8>>>> = Vec::with_capacity(size);
        let mut receivers: Vec<Vec<Option<Receiver<Vec<u8>>>>> =
            (0..size).map(|_| (0..size).map(|_| None).collect()).collect();
        for from in 0..size {
            let mut row = Vec::with_capacity(size);
            for to in 0..size {
                let (tx, rx) = unbounded();
                row.push(tx);
                receivers[to][from] = Some(rx);
            }
            senders.push(row);
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (outgoing, incoming))| LocalGroup {
                rank,
                outgoing,
                incoming: incoming.into_iter().flatten().collect(),
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn check_open(&self) -> Result<(), GroupError> {
        if self.shared.lock().closed {
            Err(GroupError::Closed)
        } else {
            Ok(())
        }
    }
}

impl ProcessGroup for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn send(&self, to: usize, bytes: Vec<u8>) -> Result<(), GroupError> {
        self.check_open()?;
        let tx = self.outgoing.get(to).ok_or(GroupError::InvalidRank(to))?;
        tx.send(bytes).map_err(|_| GroupError::Closed)
    }

    fn recv(&self, from: usize) -> Result<Vec<u8>, GroupError> {
        loop {
            if let Some(bytes) = self.recv_timeout(from, Duration::from_millis(50))? {
                return Ok(bytes);
            }
        }
    }

    fn recv_timeout(&self, from: usize, timeout: Duration) -> Result<Option<Vec<u8>>, GroupError> {
        let rx = self.incoming.get(from).ok_or(GroupError::InvalidRank(from))?;
        match rx.recv_timeout(timeout) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(RecvTimeoutError::Timeout) => {
                self.check_open()?;
                Ok(None)
            }
            Err(RecvTimeoutError::Disconnected) => Err(GroupError::Closed),
        }
    }

    fn barrier(&self) -> Result<(), GroupError> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(GroupError::Closed);
        }
        state.waiting += 1;
        if state.waiting == self.shared.size {
            state.waiting = 0;
            state.generation += 1;
            drop(state);
            self.shared.released.notify_all();
            return Ok(());
        }
        let generation = state.generation;
        while state.generation == generation && !state.closed {
            state = self
                .shared
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.generation != generation {
            Ok(())
        } else {
            Err(GroupError::Closed)
        }
    }

    fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn messages_reach_the_addressed_rank() {
        let mut ranks = LocalGroup::create(3);
        let r2 = ranks.pop().unwrap();
        let r1 = ranks.pop().unwrap();
        let r0 = ranks.pop().unwrap();

        r0.send(2, vec![1]).unwrap();
        r0.send(2, vec![2]).unwrap();
        r1.send(2, vec![9]).unwrap();

        assert_eq!(r2.recv(0).unwrap(), vec![1]);
        assert_eq!(r2.recv(0).unwrap(), vec![2]);
        assert_eq!(r2.recv(1).unwrap(), vec![9]);
        assert_eq!(r1.recv_timeout(0, Duration::from_millis(10)).unwrap(), None);
        assert_eq!(r0.send(3, vec![]), Err(GroupError::InvalidRank(3)));
    }

    #[test]
    fn barrier_waits_for_every_rank() {
        let ranks = LocalGroup::create(3);
        let passed = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = ranks
            .into_iter()
            .map(|rank| {
                let passed = Arc::clone(&passed);
                thread::spawn(move || {
                    for round in 0..5 {
                        if rank.rank() == 0 {
                            thread::sleep(Duration::from_millis(5));
                            // nobody may be past this round's barrier yet
                            assert_eq!(passed.load(Ordering::SeqCst), round * 2);
                        }
                        rank.barrier().unwrap();
                        if rank.rank() != 0 {
                            passed.fetch_add(1, Ordering::SeqCst);
                        }
                        rank.barrier().unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn close_releases_barrier_waiters() {
        let mut ranks = LocalGroup::create(2);
        let r1 = ranks.pop().unwrap();
        let r0 = ranks.pop().unwrap();
        let waiter = thread::spawn(move || r0.barrier());
        thread::sleep(Duration::from_millis(20));
        r1.close();
        assert_eq!(waiter.join().unwrap(), Err(GroupError::Closed));
        assert_eq!(r1.barrier(), Err(GroupError::Closed));
    }
}
