//! Head-node tile forwarding.
//!
//! With a head node, clients stream every tile to rank 0. Rank 0 reads
//! only the tile header and forwards the unchanged bytes to each display
//! rank whose region the tile touches; display ranks feed what they receive
//! into their own stamped inbox.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use tilewall_net::codec::decode_header;
use tilewall_net::{Inbox, Message, NetError};
use tilewall_types::Region;

use crate::error::{GroupError, ServiceError};
use crate::group::ProcessGroup;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct Dispatcher {
    stop: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Start forwarding. `regions[r]` is the wall area owned by rank `r`.
    pub fn start(
        inbox: Arc<dyn Inbox>,
        regions: Vec<Region>,
        group: Arc<dyn ProcessGroup>,
    ) -> Result<Self, ServiceError> {
        if regions.len() != group.size() {
            return Err(ServiceError::Config(format!(
                "{} regions for {} ranks",
                regions.len(),
                group.size()
            )));
        }
        let stop = Arc::new(AtomicBool::new(false));
        let rank = group.rank();
        let thread = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(format!("dispatcher-{}", rank))
                .spawn(move || {
                    if rank == 0 {
                        coordinate(inbox, regions, group, stop)
                    } else {
                        receive(inbox, group, stop)
                    }
                })
                .map_err(NetError::from)?
        };
        info!("dispatcher started on rank {}", rank);
        Ok(Self {
            stop,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("dispatcher thread panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Ranks other than `from` whose region overlaps `tile`.
pub fn route(tile: &Region, regions: &[Region], from: usize) -> Vec<usize> {
    regions
        .iter()
        .enumerate()
        .filter(|&(rank, region)| rank != from && region.overlaps(tile))
        .map(|(rank, _)| rank)
        .collect()
}

fn coordinate(
    inbox: Arc<dyn Inbox>,
    regions: Vec<Region>,
    group: Arc<dyn ProcessGroup>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Acquire) {
        let Some(msg) = inbox.get_timeout(POLL_INTERVAL) else {
            continue;
        };
        let header = match decode_header(msg.bytes()) {
            Ok(header) => header,
            Err(e) => {
                warn!("dispatcher dropped message: {}", e);
                continue;
            }
        };
        let targets = route(&header.region, &regions, group.rank());
        if targets.is_empty() {
            debug!("tile {} covers no display", header.region);
        }
        for rank in targets {
            match group.send(rank, msg.bytes().to_vec()) {
                Ok(()) => {}
                Err(GroupError::Closed) => return,
                Err(e) => warn!("forward to rank {} failed: {}", rank, e),
            }
        }
    }
}

fn receive(inbox: Arc<dyn Inbox>, group: Arc<dyn ProcessGroup>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        match group.recv_timeout(0, POLL_INTERVAL) {
            Ok(Some(bytes)) => {
                inbox.put(Message::new(bytes));
            }
            Ok(None) => {}
            Err(e) => {
                debug!("dispatcher receiver exiting: {}", e);
                return;
            }
        }
    }
}
