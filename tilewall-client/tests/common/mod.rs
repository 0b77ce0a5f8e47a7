#![allow(dead_code)]
//! Test harness utilities for tilewall-client integration tests.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tilewall_client::{query_info, ClientOptions, WallClient};
use tilewall_net::{CodecKind, Listener};
use tilewall_service::{DisplayService, FrameBuffer, LocalGroup, ServiceConfig, ServiceError};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    Listener::bind(0).unwrap().local_port()
}

/// A 2x1 wall of 4x4 displays on loopback.
pub fn wall_config(head_node: bool, info_port: u16, codec: CodecKind) -> Arc<ServiceConfig> {
    let text = format!(
        "[wall]\nnum_displays = [2, 1]\nwindow_size = [4, 4]\n\n\
         [service]\ninfo_port = {}\nclient_port = 0\nhead_node = {}\n\
         advertise_host = \"127.0.0.1\"\nassembler_threads = 2\ncodec = \"{}\"\n",
        info_port, head_node, codec
    );
    Arc::new(ServiceConfig::from_toml(&text).unwrap())
}

/// Run every rank on its own thread. Display ranks collect `frames` frames;
/// a head node syncs until the display ranks are gone.
pub fn spawn_wall(
    config: Arc<ServiceConfig>,
    frames: usize,
) -> Vec<JoinHandle<Result<Vec<FrameBuffer>, ServiceError>>> {
    LocalGroup::create(config.rank_count())
        .into_iter()
        .map(|group| {
            let config = Arc::clone(&config);
            thread::spawn(move || {
                let service = DisplayService::start(&config, Arc::new(group))?;
                let mut collected = Vec::new();
                if service.is_head_node() {
                    service.run_head_node()?;
                    return Ok(collected);
                }
                while collected.len() < frames {
                    match service.wait_for_next_frame()? {
                        Some(frame) => collected.push(frame),
                        None => break,
                    }
                }
                Ok(collected)
            })
        })
        .collect()
}

/// Connect once the wall's info server answers.
pub fn connect(info_port: u16, codec: CodecKind) -> WallClient {
    let start = Instant::now();
    while let Err(e) = query_info("127.0.0.1", info_port) {
        if start.elapsed() > TIMEOUT {
            panic!("info server never came up: {}", e);
        }
        thread::sleep(Duration::from_millis(10));
    }
    let options = ClientOptions {
        encoder_threads: 2,
        codec,
        ..ClientOptions::default()
    };
    WallClient::connect("127.0.0.1", info_port, 1, options).unwrap()
}

/// A `width` x `height` image whose pixel at (x, y) is `base + y * width + x`.
pub fn gradient(width: usize, height: usize, base: u32) -> Vec<u32> {
    (0..width * height).map(|i| base + i as u32).collect()
}

/// Collect each rank's frames, head node included.
pub fn join_wall(
    ranks: Vec<JoinHandle<Result<Vec<FrameBuffer>, ServiceError>>>,
) -> Vec<Vec<FrameBuffer>> {
    ranks
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect()
}
