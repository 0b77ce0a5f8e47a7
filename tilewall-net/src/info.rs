//! One-shot wall description protocol.
//!
//! A client connects to the info port, reads one ServiceInfo record and
//! hangs up. The record layout is fixed (little-endian):
//!
//! ```text
//! magic u64 | total_pixels 2*i32 | num_displays 2*i32 | stereo i32
//! | has_control_window i32 | control_window_size 2*i32 | num_nodes i32
//! | num_nodes * { host_name (i32 len + bytes) | port i32 | region 4*i32 }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use tilewall_types::{NodeInfo, Region, ServiceInfo, Vec2i};

use crate::connection::{Connection, ConnectionReader, ConnectionWriter, Listener};
use crate::error::NetError;
use crate::peer_group::PORT_PROBE_ATTEMPTS;

const MAX_NODES: i32 = 4096;
const MAX_HOST_NAME: usize = 1024;
const ACCEPT_POLL: Duration = Duration::from_millis(10);
const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn write_vec2i(w: &mut ConnectionWriter, v: Vec2i) -> Result<(), NetError> {
    w.write_i32(v.x)?;
    w.write_i32(v.y)
}

fn read_vec2i(r: &mut ConnectionReader) -> Result<Vec2i, NetError> {
    Ok(Vec2i::new(r.read_i32()?, r.read_i32()?))
}

pub fn write_service_info(w: &mut ConnectionWriter, info: &ServiceInfo) -> Result<(), NetError> {
    w.write_u64(info.magic)?;
    write_vec2i(w, info.total_pixels_in_wall)?;
    write_vec2i(w, info.num_displays)?;
    w.write_i32(info.stereo as i32)?;
    w.write_i32(info.has_control_window as i32)?;
    write_vec2i(w, info.control_window_size)?;
    w.write_i32(info.nodes.len() as i32)?;
    for node in &info.nodes {
        w.write_string(&node.host_name)?;
        w.write_i32(node.port)?;
        write_vec2i(w, node.region.lower)?;
        write_vec2i(w, node.region.upper)?;
    }
    w.flush()
}

pub fn read_service_info(r: &mut ConnectionReader) -> Result<ServiceInfo, NetError> {
    let mut info = ServiceInfo::new(r.read_u64()?);
    info.total_pixels_in_wall = read_vec2i(r)?;
    info.num_displays = read_vec2i(r)?;
    info.stereo = r.read_i32()? != 0;
    info.has_control_window = r.read_i32()? != 0;
    info.control_window_size = read_vec2i(r)?;

    let num_nodes = r.read_i32()?;
    if !(0..=MAX_NODES).contains(&num_nodes) {
        return Err(NetError::ProtocolMismatch(format!(
            "node count {} out of range",
            num_nodes
        )));
    }
    for _ in 0..num_nodes {
        let host_name = r.read_string(MAX_HOST_NAME)?;
        let port = r.read_i32()?;
        let lower = read_vec2i(r)?;
        let upper = read_vec2i(r)?;
        info.nodes.push(NodeInfo {
            host_name,
            port,
            region: Region::new(lower, upper),
        });
    }
    Ok(info)
}

/// Fetch the wall description from a running service.
pub fn query_info(host: &str, port: u16) -> Result<ServiceInfo, NetError> {
    let conn = Connection::connect(host, port)?;
    let (mut reader, _writer) = conn.split();
    reader.set_read_timeout(Some(IO_TIMEOUT))?;
    read_service_info(&mut reader)
}

/// Serves a fixed ServiceInfo to every connecting client.
pub struct InfoServer {
    port: u16,
    stop: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl InfoServer {
    /// Bind on `port` (or the next free one) and start serving.
    pub fn start(port: u16, info: ServiceInfo) -> Result<Self, NetError> {
        let listener = Listener::bind_probing(port, PORT_PROBE_ATTEMPTS)?;
        listener.set_nonblocking(true)?;
        let port = listener.local_port();
        info!("info server listening on port {}", port);

        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("info-server".into())
                .spawn(move || serve(listener, info, stop))?
        };
        Ok(Self {
            port,
            stop,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
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
                warn!("info server thread panicked");
            }
        }
    }
}

impl Drop for InfoServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve(listener: Listener, info: ServiceInfo, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        match listener.try_accept() {
            Ok(Some(conn)) => {
                let addr = conn.peer_addr();
                let (_, mut writer) = conn.split();
                let sent = writer
                    .set_write_timeout(Some(IO_TIMEOUT))
                    .and_then(|_| write_service_info(&mut writer, &info));
                match sent {
                    Ok(()) => debug!("served wall info to {}", addr),
                    Err(e) => warn!("failed to serve wall info to {}: {}", addr, e),
                }
            }
            Ok(None) => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!("info server accept failed: {}", e);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    debug!("info server stopped");
}
