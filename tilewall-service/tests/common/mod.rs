#![allow(dead_code)]
//! Test harness utilities for tilewall-service integration tests.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tilewall_net::{query_info, Listener, Message, PeerGroup, PeerId, RawCodec, TileCodec};
use tilewall_service::{DisplayService, FrameBuffer, LocalGroup, ServiceConfig, ServiceError};
use tilewall_types::{Eye, FrameId, Region, ServiceInfo, Tile, Vec2i};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    Listener::bind(0).unwrap().local_port()
}

/// A 2x1 wall of 4x4 displays on loopback.
pub fn wall_config(head_node: bool, info_port: u16, stereo: bool) -> Arc<ServiceConfig> {
    let text = format!(
        "[wall]\nnum_displays = [2, 1]\nwindow_size = [4, 4]\nstereo = {}\n\n\
         [service]\ninfo_port = {}\nclient_port = 0\nhead_node = {}\n\
         advertise_host = \"127.0.0.1\"\nassembler_threads = 2\n",
        stereo, info_port, head_node
    );
    Arc::new(ServiceConfig::from_toml(&text).unwrap())
}

/// Start every rank on its own thread and hand the running service to `body`.
pub fn spawn_ranks<T, F>(config: Arc<ServiceConfig>, body: F) -> Vec<JoinHandle<Result<T, ServiceError>>>
where
    T: Send + 'static,
    F: Fn(DisplayService) -> Result<T, ServiceError> + Send + Sync + 'static,
{
    let body = Arc::new(body);
    LocalGroup::create(config.rank_count())
        .into_iter()
        .map(|group| {
            let config = Arc::clone(&config);
            let body = Arc::clone(&body);
            thread::spawn(move || {
                let service = DisplayService::start(&config, Arc::new(group))?;
                body(service)
            })
        })
        .collect()
}

/// Each display rank returns its first frame; a head node just syncs.
pub fn first_frame(service: DisplayService) -> Result<Option<FrameBuffer>, ServiceError> {
    if service.is_head_node() {
        service.run_head_node()?;
        return Ok(None);
    }
    service.wait_for_next_frame()
}

/// Poll the info port until the service answers.
pub fn wait_for_info(port: u16) -> ServiceInfo {
    let start = Instant::now();
    loop {
        match query_info("127.0.0.1", port) {
            Ok(info) => return info,
            Err(e) if start.elapsed() > TIMEOUT => panic!("info server never came up: {}", e),
            Err(_) => thread::sleep(Duration::from_millis(10)),
        }
    }
}

/// Connect as a single client to every node in `info`.
pub fn connect_client(info: &ServiceInfo) -> PeerGroup {
    let targets: Vec<(String, u16)> = info
        .nodes
        .iter()
        .map(|n| (n.host_name.clone(), n.port as u16))
        .collect();
    PeerGroup::connect(info.magic, 1, &targets).unwrap()
}

/// Block for one credit token from node 0.
pub fn take_token(client: &PeerGroup) -> Message {
    client
        .inbox(PeerId(0))
        .unwrap()
        .get_timeout(TIMEOUT)
        .expect("no credit token")
}

/// Send a solid tile to every node whose region it touches.
pub fn send_solid(client: &PeerGroup, info: &ServiceInfo, region: Region, eye: Eye, frame: FrameId, value: u32) {
    let mut tile = Tile::new(region, eye, frame);
    tile.pixels.fill(value);
    let msg = RawCodec.encode(&tile).unwrap();
    let peers: Vec<PeerId> = info.nodes_overlapping(&region).into_iter().map(PeerId).collect();
    client.send_to(&peers, msg).unwrap();
}

pub fn region(x0: i32, y0: i32, x1: i32, y1: i32) -> Region {
    Region::new(Vec2i::new(x0, y0), Vec2i::new(x1, y1))
}
