//! Encoding and routing submitted tiles.
//!
//! Submitted tiles are copied into a bounded queue and picked up by a pool
//! of encoder threads. Each encoded tile goes to every node whose region it
//! touches, through the client's single outbound peer group.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use tilewall_net::{FrameQueue, NetError, PeerGroup, PeerId, TileCodec};
use tilewall_types::{Eye, FrameId, Region, ServiceInfo, Tile};

use crate::error::ClientError;

struct ProducerShared {
    queue: FrameQueue<Tile>,
    info: Arc<ServiceInfo>,
    peers: Arc<PeerGroup>,
    codec: Arc<dyn TileCodec>,
    sent: AtomicU64,
    unrouted: AtomicU64,
}

impl ProducerShared {
    fn encode_and_send(&self, tile: Tile) -> Result<(), NetError> {
        let nodes = self.info.nodes_overlapping(&tile.region);
        if nodes.is_empty() {
            self.unrouted.fetch_add(1, Ordering::Relaxed);
            debug!("tile {} touches no node, dropped", tile.region);
            return Ok(());
        }
        let msg = self.codec.encode(&tile)?;
        let peers: Vec<PeerId> = nodes.into_iter().map(PeerId).collect();
        self.peers.send_to(&peers, msg)?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

pub struct TileProducer {
    shared: Arc<ProducerShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TileProducer {
    /// Start `threads` encoder workers. At most `capacity` tiles wait for
    /// encoding; `submit_tile` blocks beyond that.
    pub fn start(
        info: Arc<ServiceInfo>,
        peers: Arc<PeerGroup>,
        codec: Arc<dyn TileCodec>,
        threads: usize,
        capacity: usize,
    ) -> Result<Self, ClientError> {
        let shared = Arc::new(ProducerShared {
            queue: FrameQueue::bounded(capacity),
            info,
            peers,
            codec,
            sent: AtomicU64::new(0),
            unrouted: AtomicU64::new(0),
        });
        let producer = Self {
            shared,
            workers: Mutex::new(Vec::new()),
        };
        for i in 0..threads.max(1) {
            let shared = Arc::clone(&producer.shared);
            let handle = thread::Builder::new()
                .name(format!("tile-encoder-{}", i))
                .spawn(move || encoder_loop(shared))
                .map_err(NetError::from)?;
            producer
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
        }
        Ok(producer)
    }

    /// Copy a `region`-sized rectangle out of `pixels` (rows `pitch` apart)
    /// and queue it. The caller may reuse `pixels` as soon as this returns.
    pub fn submit_tile(
        &self,
        region: Region,
        eye: Eye,
        frame_id: FrameId,
        pixels: &[u32],
        pitch: usize,
    ) -> Result<(), ClientError> {
        if region.is_empty() {
            return Err(ClientError::InvalidTile(format!("empty region {}", region)));
        }
        let tile = Tile::copy_from(region, eye, frame_id, pixels, pitch).ok_or_else(|| {
            ClientError::InvalidTile(format!(
                "{} pixels with pitch {} cannot hold {}",
                pixels.len(),
                pitch,
                region
            ))
        })?;
        self.submit(tile)
    }

    /// Queue an already owned tile.
    pub fn submit(&self, tile: Tile) -> Result<(), ClientError> {
        if self.shared.queue.put(tile) {
            Ok(())
        } else {
            Err(ClientError::Disconnected)
        }
    }

    /// Tiles waiting for an encoder.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Tiles encoded and handed to the network.
    pub fn sent(&self) -> u64 {
        self.shared.sent.load(Ordering::Relaxed)
    }

    /// Tiles dropped because they touched no node.
    pub fn unrouted(&self) -> u64 {
        self.shared.unrouted.load(Ordering::Relaxed)
    }

    /// Stop taking tiles, encode and send what is queued, join the workers.
    pub fn finish(&self) {
        self.shared.queue.close();
        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in workers {
            if handle.join().is_err() {
                warn!("tile encoder panicked");
            }
        }
    }
}

impl Drop for TileProducer {
    fn drop(&mut self) {
        self.finish();
    }
}

fn encoder_loop(shared: Arc<ProducerShared>) {
    while let Some(tile) = shared.queue.get() {
        match shared.encode_and_send(tile) {
            Ok(()) => {}
            Err(NetError::Shutdown) => {
                shared.queue.close();
                break;
            }
            Err(e) => warn!("tile not sent: {}", e),
        }
    }
}
