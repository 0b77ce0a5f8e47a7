//! One rank of a running display wall.
//!
//! Two topologies are supported. Peer-direct: every rank drives a display
//! and accepts tile connections itself; clients send each tile straight to
//! the ranks it touches. Head node: rank 0 drives no display, it accepts all
//! client connections and forwards tiles to display ranks 1..n.
//!
//! In both, rank 0 runs the info server and hands out credit tokens: one per
//! frame the whole wall has finished, plus `max_frames_in_flight` up front.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use tilewall_net::{Inbox, InfoServer, Message, NetError, PeerGroup, StampedFrameQueue};
use tilewall_types::{FrameId, NodeInfo, Region, ServiceInfo, Vec2i};

use crate::assembler::{FrameAssembler, FrameBuffer};
use crate::config::ServiceConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{GroupError, ServiceError};
use crate::group::ProcessGroup;

/// Payload broadcast to clients once all of them are connected.
pub const WELCOME_LEN: usize = 13;

pub struct DisplayService {
    group: Arc<dyn ProcessGroup>,
    head_node: bool,
    cookie: u64,
    region: Region,
    inbox: Arc<StampedFrameQueue>,
    clients: Option<PeerGroup>,
    info_server: Option<InfoServer>,
    service_info: Option<ServiceInfo>,
    assembler: Option<FrameAssembler>,
    dispatcher: Option<Dispatcher>,
    /// Frames the wall has completed; rank 0 only.
    frames_synced: AtomicI32,
    stopped: AtomicBool,
}

impl DisplayService {
    /// Bring up this rank. Every rank of `group` must call this with the
    /// same configuration; it returns once the expected clients have
    /// connected and received their welcome.
    pub fn start(config: &ServiceConfig, group: Arc<dyn ProcessGroup>) -> Result<Self, ServiceError> {
        let started = Self::start_rank(config, Arc::clone(&group));
        if let Err(e) = &started {
            warn!("rank {} failed to start: {}", group.rank(), e);
            group.close();
        }
        started
    }

    fn start_rank(config: &ServiceConfig, group: Arc<dyn ProcessGroup>) -> Result<Self, ServiceError> {
        let rank = group.rank();
        let head_node = config.head_node();
        let layout = config.layout();
        if layout.display_count() == 0 {
            return Err(ServiceError::Config("wall has no displays".into()));
        }
        if group.size() != config.rank_count() {
            return Err(ServiceError::Config(format!(
                "{} displays{} need {} ranks, group has {}",
                layout.display_count(),
                if head_node { " plus head node" } else { "" },
                config.rank_count(),
                group.size()
            )));
        }

        let cookie = share_cookie(group.as_ref())?;
        let inbox = Arc::new(StampedFrameQueue::new());
        let accepts_clients = !head_node || rank == 0;
        if head_node && rank == 0 {
            inbox.start_new_frame(0);
        }

        let clients = if accepts_clients {
            let shared: Arc<dyn Inbox> = inbox.clone();
            Some(PeerGroup::listen(cookie, shared, config.client_port())?)
        } else {
            None
        };
        group.barrier()?;

        let display = if head_node { rank as i32 - 1 } else { rank as i32 };
        let region = layout.region_of_display(display);
        info!("rank {}/{} serves display {} at {}", rank, group.size(), display, region);

        let service_info = build_service_info(config, group.as_ref(), clients.as_ref(), cookie, region)?;
        let info_server = match &service_info {
            Some(info) => {
                info!(
                    "wall of {} pixels served by {} nodes",
                    info.total_pixels_in_wall,
                    info.nodes.len()
                );
                Some(InfoServer::start(config.info_port(), info.clone())?)
            }
            None => None,
        };
        group.barrier()?;

        let assembler = if !head_node || rank != 0 {
            Some(FrameAssembler::new(
                Arc::clone(&inbox),
                region,
                config.stereo(),
                config.assembler_threads(),
                config.codec().build(),
            )?)
        } else {
            None
        };
        group.barrier()?;

        let dispatcher = if head_node {
            let regions = (0..group.size())
                .map(|r| layout.region_of_display(r as i32 - 1))
                .collect();
            let shared: Arc<dyn Inbox> = inbox.clone();
            Some(Dispatcher::start(shared, regions, Arc::clone(&group))?)
        } else {
            None
        };
        group.barrier()?;

        if let Some(clients) = &clients {
            info!("rank {} waiting for clients on port {:?}", rank, clients.local_port());
            clients.wait_for_all_connected()?;
            clients.broadcast(Message::new(vec![0; WELCOME_LEN]))?;
            info!("rank {}: {} clients connected", rank, clients.peer_count());
        }
        group.barrier()?;

        if rank == 0 {
            if let Some(clients) = &clients {
                for token in 0..config.max_frames_in_flight() as FrameId {
                    clients.broadcast(Message::new(token.to_le_bytes().to_vec()))?;
                }
            }
        }

        Ok(Self {
            group,
            head_node,
            cookie,
            region,
            inbox,
            clients,
            info_server,
            service_info,
            assembler,
            dispatcher,
            frames_synced: AtomicI32::new(0),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn rank(&self) -> usize {
        self.group.rank()
    }

    /// Wall pixels this rank displays; empty for a head node.
    pub fn region(&self) -> Region {
        self.region
    }

    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    pub fn is_head_node(&self) -> bool {
        self.head_node && self.group.rank() == 0
    }

    /// Port of the info server, on rank 0.
    pub fn info_port(&self) -> Option<u16> {
        self.info_server.as_ref().map(InfoServer::port)
    }

    /// Port clients stream tiles to, on ranks that accept them.
    pub fn client_port(&self) -> Option<u16> {
        self.clients.as_ref().and_then(PeerGroup::local_port)
    }

    /// What the info server hands out, on rank 0.
    pub fn service_info(&self) -> Option<&ServiceInfo> {
        self.service_info.as_ref()
    }

    /// Block for this rank's next complete frame, then sync with the other
    /// ranks so the clients get their credit. `None` once shut down.
    pub fn wait_for_next_frame(&self) -> Result<Option<FrameBuffer>, ServiceError> {
        let assembler = self.assembler.as_ref().ok_or_else(|| {
            ServiceError::Config(format!("rank {} assembles no frames", self.rank()))
        })?;
        let Some(frame) = assembler.collect_assembled_frame() else {
            return Ok(None);
        };
        self.sync_on_frame_received()?;
        Ok(Some(frame))
    }

    /// End-of-frame sync. Every rank calls this once per frame; rank 0 then
    /// sends the clients a credit token.
    pub fn sync_on_frame_received(&self) -> Result<(), ServiceError> {
        self.group.barrier()?;
        if self.group.rank() != 0 {
            return Ok(());
        }
        let frame = self.frames_synced.fetch_add(1, Ordering::AcqRel);
        if let Some(clients) = &self.clients {
            clients.broadcast(Message::new(frame.to_le_bytes().to_vec()))?;
        }
        if self.head_node {
            // display ranks advance their own inboxes when they finish a frame
            self.inbox.start_new_frame(frame + 1);
        }
        debug!("frame {} done on all ranks", frame);
        Ok(())
    }

    /// Drive the end-of-frame sync on a head node until shutdown.
    pub fn run_head_node(&self) -> Result<(), ServiceError> {
        if !self.is_head_node() {
            return Err(ServiceError::Config(format!(
                "rank {} is not a head node",
                self.rank()
            )));
        }
        let mut last = Instant::now();
        loop {
            match self.sync_on_frame_received() {
                Ok(()) => {}
                Err(_) if self.stopped.load(Ordering::Acquire) => return Ok(()),
                Err(ServiceError::Group(GroupError::Closed)) => {
                    info!("rank group closed, head node stopping");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
            let now = Instant::now();
            let secs = now.duration_since(last).as_secs_f64();
            last = now;
            if secs > 0.0 {
                debug!("head node: {:.1} fps", 1.0 / secs);
            }
        }
    }

    /// Frames completed by the whole wall so far (rank 0).
    pub fn frames_synced(&self) -> FrameId {
        self.frames_synced.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("rank {} shutting down", self.rank());
        self.group.close();
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.shutdown();
        }
        if let Some(assembler) = &self.assembler {
            assembler.shutdown();
        }
        if let Some(clients) = &self.clients {
            clients.shutdown();
        }
        if let Some(info_server) = &self.info_server {
            info_server.shutdown();
        }
        self.inbox.close();
    }
}

impl Drop for DisplayService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn new_cookie() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    (nanos ^ ((std::process::id() as u64) << 32)) | 1
}

/// Rank 0 picks the session cookie and sends it to everyone else.
fn share_cookie(group: &dyn ProcessGroup) -> Result<u64, ServiceError> {
    if group.rank() == 0 {
        let cookie = new_cookie();
        for rank in 1..group.size() {
            group.send(rank, cookie.to_le_bytes().to_vec())?;
        }
        Ok(cookie)
    } else {
        let bytes = group.recv(0)?;
        let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
            NetError::ProtocolMismatch(format!("cookie of {} bytes", bytes.len()))
        })?;
        Ok(u64::from_le_bytes(raw))
    }
}

fn advertised_host(config: &ServiceConfig) -> String {
    match config.advertise_host() {
        Some(host) => host.to_string(),
        None => gethostname::gethostname().to_string_lossy().to_string(),
    }
}

fn node_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

/// Collectively build the ServiceInfo; only rank 0 gets `Some`.
fn build_service_info(
    config: &ServiceConfig,
    group: &dyn ProcessGroup,
    clients: Option<&PeerGroup>,
    cookie: u64,
    region: Region,
) -> Result<Option<ServiceInfo>, ServiceError> {
    let layout = config.layout();
    let port = clients.and_then(PeerGroup::local_port).map_or(-1, i32::from);
    let host_name = advertised_host(config);

    if group.rank() != 0 {
        if !config.head_node() {
            let node = NodeInfo {
                host_name,
                port,
                region,
            };
            let bytes = bincode::serde::encode_to_vec(&node, node_config())
                .map_err(|e| NetError::ProtocolMismatch(format!("node announcement: {}", e)))?;
            group.send(0, bytes)?;
        }
        return Ok(None);
    }

    let mut info = ServiceInfo::new(cookie);
    info.num_displays = layout.num_displays();
    info.total_pixels_in_wall = layout.total_pixels();
    info.stereo = config.stereo();
    if config.has_control_window() {
        info.has_control_window = true;
        info.control_window_size = config.control_window_size();
    }

    if config.head_node() {
        info.nodes.push(NodeInfo {
            host_name,
            port,
            region: Region::new(Vec2i::default(), info.total_pixels_in_wall),
        });
    } else {
        info.nodes.push(NodeInfo {
            host_name,
            port,
            region,
        });
        for rank in 1..group.size() {
            let bytes = group.recv(rank)?;
            let (node, _): (NodeInfo, usize) =
                bincode::serde::decode_from_slice(&bytes, node_config()).map_err(|e| {
                    NetError::ProtocolMismatch(format!("node announcement from rank {}: {}", rank, e))
                })?;
            info.nodes.push(node);
        }
    }
    Ok(Some(info))
}
