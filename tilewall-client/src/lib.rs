//! Render-side client for a tilewall display wall.
//!
//! A client asks the wall's info port for the [`ServiceInfo`], connects to
//! every tile node it lists, and from then on streams frames as rectangles
//! of RGBA pixels. Frames are paced by credit tokens from the wall: call
//! [`WallClient::begin_frame`] before sending a frame's tiles and
//! [`WallClient::end_frame`] after.
//!
//! ```no_run
//! use tilewall_client::{ClientOptions, WallClient};
//!
//! let client = WallClient::connect("wall-head", 2903, 1, ClientOptions::default())?;
//! let size = client.info().total_pixels_in_wall;
//! let pixels = vec![0xff00_00ffu32; (size.x * size.y) as usize];
//! for _ in 0..100 {
//!     client.begin_frame()?;
//!     client.send_rgba(0, 0, size.x, size.y, size.x as usize, &pixels)?;
//!     client.end_frame();
//! }
//! client.disconnect();
//! # Ok::<(), tilewall_client::ClientError>(())
//! ```

pub mod error;
pub mod producer;

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use log::info;
use tilewall_net::{CodecKind, NetError, PeerGroup, PeerId};
use tilewall_types::{Eye, FrameId, Region, ServiceInfo, Vec2i};

pub use error::ClientError;
pub use producer::TileProducer;

/// Tuning for a [`WallClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub encoder_threads: usize,
    /// Must match the codec the wall was configured with.
    pub codec: CodecKind,
    /// Tiles that may wait for an encoder before `send_rgba` blocks.
    pub queue_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            encoder_threads: 8,
            codec: CodecKind::Raw,
            queue_capacity: 1024,
        }
    }
}

/// Fetch the wall description from `host:port`.
pub fn query_info(host: &str, port: u16) -> Result<ServiceInfo, ClientError> {
    tilewall_net::query_info(host, port).map_err(|source| ClientError::InfoUnavailable {
        addr: format!("{}:{}", host, port),
        source,
    })
}

/// A connection to one display wall.
pub struct WallClient {
    info: Arc<ServiceInfo>,
    peers: Arc<PeerGroup>,
    producer: TileProducer,
    frame_id: AtomicI32,
    closed: AtomicBool,
}

impl WallClient {
    /// Connect to the wall whose info server listens on `host:port`.
    ///
    /// `num_peers` is the number of client processes rendering to the wall
    /// together, this one included; the call returns once all of them have
    /// connected.
    pub fn connect(
        host: &str,
        port: u16,
        num_peers: i32,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let info = query_info(host, port)?;
        if info.nodes.is_empty() {
            return Err(NetError::ProtocolMismatch("wall lists no nodes".into()).into());
        }
        let targets = info
            .nodes
            .iter()
            .map(|node| {
                let port = u16::try_from(node.port).map_err(|_| {
                    NetError::ProtocolMismatch(format!(
                        "node {} has port {}",
                        node.host_name, node.port
                    ))
                })?;
                Ok((node.host_name.clone(), port))
            })
            .collect::<Result<Vec<_>, NetError>>()?;
        info!(
            "wall at {}:{} is {}x{} pixels on {} nodes",
            host,
            port,
            info.total_pixels_in_wall.x,
            info.total_pixels_in_wall.y,
            targets.len()
        );

        let peers = Arc::new(PeerGroup::connect(info.magic, num_peers, &targets)?);
        let info = Arc::new(info);
        let producer = TileProducer::start(
            Arc::clone(&info),
            Arc::clone(&peers),
            options.codec.build(),
            options.encoder_threads,
            options.queue_capacity,
        )?;
        Ok(Self {
            info,
            peers,
            producer,
            frame_id: AtomicI32::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn info(&self) -> &ServiceInfo {
        &self.info
    }

    /// Frame the next tiles belong to.
    pub fn frame_id(&self) -> FrameId {
        self.frame_id.load(Ordering::Acquire)
    }

    /// Wait for the wall to grant one more frame in flight.
    pub fn begin_frame(&self) -> Result<(), ClientError> {
        let token = self
            .peers
            .inbox(PeerId(0))
            .and_then(|inbox| inbox.get())
            .ok_or(ClientError::Disconnected)?;
        log::trace!("credit token of {} bytes", token.len());
        Ok(())
    }

    pub fn end_frame(&self) {
        self.frame_id.fetch_add(1, Ordering::AcqRel);
    }

    /// Send a `w` x `h` block of the left (or only) eye at `(x0, y0)`.
    /// `pixels` holds rows `pitch` pixels apart.
    pub fn send_rgba(
        &self,
        x0: i32,
        y0: i32,
        w: i32,
        h: i32,
        pitch: usize,
        pixels: &[u32],
    ) -> Result<(), ClientError> {
        self.send_rgba_eye(Eye::Left, x0, y0, w, h, pitch, pixels)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn send_rgba_eye(
        &self,
        eye: Eye,
        x0: i32,
        y0: i32,
        w: i32,
        h: i32,
        pitch: usize,
        pixels: &[u32],
    ) -> Result<(), ClientError> {
        let upper = x0.checked_add(w).zip(y0.checked_add(h)).ok_or_else(|| {
            ClientError::InvalidTile(format!("{}x{} block at ({}, {}) overflows", w, h, x0, y0))
        })?;
        let region = Region::new(Vec2i::new(x0, y0), Vec2i::new(upper.0, upper.1));
        self.producer
            .submit_tile(region, eye, self.frame_id(), pixels, pitch)
    }

    /// Flush queued tiles and close every connection.
    pub fn disconnect(self) {
        self.close();
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.producer.finish();
        self.peers.shutdown();
        info!(
            "disconnected after {} frames, {} tiles sent",
            self.frame_id(),
            self.producer.sent()
        );
    }
}

impl Drop for WallClient {
    fn drop(&mut self) {
        self.close();
    }
}
