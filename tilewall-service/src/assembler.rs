//! Compositing incoming tiles into whole display frames.
//!
//! A pool of workers pulls tile messages off a stamped inbox, decodes them
//! and copies the part that falls inside this display into the frame being
//! built. The worker that supplies the last missing pixel hands the frame to
//! the finished queue and opens the next one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use tilewall_net::{FrameQueue, Inbox, NetError, StampedFrameQueue, TileCodec};
use tilewall_types::{Eye, FrameId, Region, Tile, Vec2i};

use crate::error::ServiceError;

/// A completed frame for one display. Never modified after completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    pub frame_id: FrameId,
    /// Wall pixels this buffer covers.
    pub region: Region,
    pub size: Vec2i,
    /// Row-major RGBA, `size.x` pixels per row.
    pub left: Vec<u32>,
    /// Empty unless the wall is stereo.
    pub right: Vec<u32>,
}

impl FrameBuffer {
    pub fn eye(&self, eye: Eye) -> &[u32] {
        match eye {
            Eye::Left => &self.left,
            Eye::Right => &self.right,
        }
    }
}

struct Progress {
    completed: [usize; 2],
    finished: bool,
}

/// The frame currently being filled in.
pub struct FrameToBe {
    frame_id: FrameId,
    region: Region,
    stereo: bool,
    expected: usize,
    eyes: [Mutex<Vec<u32>>; 2],
    progress: Mutex<Progress>,
}

impl FrameToBe {
    pub fn new(frame_id: FrameId, region: Region, stereo: bool) -> Self {
        let expected = region.area();
        let right = if stereo { expected } else { 0 };
        Self {
            frame_id,
            region,
            stereo,
            expected,
            eyes: [Mutex::new(vec![0; expected]), Mutex::new(vec![0; right])],
            progress: Mutex::new(Progress {
                completed: [0, 0],
                finished: false,
            }),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    fn lock_eye(&self, eye: Eye) -> MutexGuard<'_, Vec<u32>> {
        self.eyes[eye.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy the part of `tile` inside this frame's region. Returns the
    /// number of pixels written.
    pub fn composite(&self, tile: &Tile) -> usize {
        let Some(clip) = tile.region.intersection(&self.region) else {
            return 0;
        };
        let mut buf = self.lock_eye(tile.eye);
        if buf.len() != self.expected {
            // already handed off, or an eye this frame does not carry
            return 0;
        }

        let local_pitch = self.region.width() as usize;
        let tile_pitch = tile.pitch();
        let width = clip.width() as usize;
        for y in clip.lower.y..clip.upper.y {
            let src = (y - tile.region.lower.y) as usize * tile_pitch
                + (clip.lower.x - tile.region.lower.x) as usize;
            let dst = (y - self.region.lower.y) as usize * local_pitch
                + (clip.lower.x - self.region.lower.x) as usize;
            buf[dst..dst + width].copy_from_slice(&tile.pixels[src..src + width]);
        }
        clip.area()
    }

    /// Count `n` more pixels of `eye` as done. Returns true for exactly one
    /// call: the one that completes every eye in use.
    pub fn mark_pixels_completed(&self, eye: Eye, n: usize) -> bool {
        let mut progress = self.lock_progress();
        progress.completed[eye.index()] += n;
        if progress.finished {
            return false;
        }
        let left_done = progress.completed[0] >= self.expected;
        let right_done = !self.stereo || progress.completed[1] >= self.expected;
        if left_done && right_done {
            progress.finished = true;
            true
        } else {
            false
        }
    }

    /// Pixels counted so far for `eye`.
    pub fn completed(&self, eye: Eye) -> usize {
        self.lock_progress().completed[eye.index()]
    }

    fn take_buffer(&self) -> FrameBuffer {
        FrameBuffer {
            frame_id: self.frame_id,
            region: self.region,
            size: self.region.size(),
            left: std::mem::take(&mut *self.lock_eye(Eye::Left)),
            right: std::mem::take(&mut *self.lock_eye(Eye::Right)),
        }
    }
}

struct AssemblerShared {
    inbox: Arc<StampedFrameQueue>,
    region: Region,
    stereo: bool,
    codec: Arc<dyn TileCodec>,
    current: Mutex<Arc<FrameToBe>>,
    finished: FrameQueue<FrameBuffer>,
}

impl AssemblerShared {
    fn current(&self) -> Arc<FrameToBe> {
        Arc::clone(&self.current.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn start_on_frame(&self, frame_id: FrameId) {
        let next = Arc::new(FrameToBe::new(frame_id, self.region, self.stereo));
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = next;
        self.inbox.start_new_frame(frame_id);
    }

    fn finish(&self, frame: &FrameToBe) {
        debug!("frame {} assembled for {}", frame.frame_id, self.region);
        self.finished.put(frame.take_buffer());
        self.start_on_frame(frame.frame_id + 1);
    }

    fn handle(&self, bytes: &[u8]) {
        let frame = self.current();
        let tile = match self.codec.decode(bytes) {
            Ok(tile) => tile,
            Err(e) => {
                warn!("undecodable tile dropped: {}", e);
                return;
            }
        };
        if tile.frame_id != frame.frame_id {
            debug!("tile for frame {} ignored while assembling {}", tile.frame_id, frame.frame_id);
            return;
        }
        if tile.eye == Eye::Right && !self.stereo {
            debug!("right-eye tile ignored on mono display");
            return;
        }
        let written = frame.composite(&tile);
        if written == 0 {
            warn!("tile {} has no pixels in {}", tile.region, self.region);
            return;
        }
        if frame.mark_pixels_completed(tile.eye, written) {
            self.finish(&frame);
        }
    }
}

/// Builds frames for one display region out of a stamped inbox.
pub struct FrameAssembler {
    shared: Arc<AssemblerShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl FrameAssembler {
    /// Open frame 0 and start `workers` assembler threads.
    pub fn new(
        inbox: Arc<StampedFrameQueue>,
        region: Region,
        stereo: bool,
        workers: usize,
        codec: Arc<dyn TileCodec>,
    ) -> Result<Self, ServiceError> {
        if region.is_empty() {
            return Err(ServiceError::Config(format!(
                "cannot assemble empty region {}",
                region
            )));
        }
        let shared = Arc::new(AssemblerShared {
            inbox,
            region,
            stereo,
            codec,
            current: Mutex::new(Arc::new(FrameToBe::new(0, region, stereo))),
            finished: FrameQueue::unbounded(),
        });
        shared.inbox.start_new_frame(0);

        let assembler = Self {
            shared,
            workers: Mutex::new(Vec::new()),
        };
        for i in 0..workers.max(1) {
            let shared = Arc::clone(&assembler.shared);
            let handle = thread::Builder::new()
                .name(format!("assembler-{}", i))
                .spawn(move || {
                    while let Some(msg) = shared.inbox.get() {
                        shared.handle(msg.bytes());
                    }
                })
                .map_err(NetError::from)?;
            assembler.lock_workers().push(handle);
        }
        info!(
            "assembling {} with {} workers ({})",
            region,
            workers.max(1),
            if stereo { "stereo" } else { "mono" }
        );
        Ok(assembler)
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn region(&self) -> Region {
        self.shared.region
    }

    /// Frame currently being filled.
    pub fn current_frame_id(&self) -> FrameId {
        self.shared.current().frame_id
    }

    /// Block for the oldest assembled frame; `None` once shut down.
    pub fn collect_assembled_frame(&self) -> Option<FrameBuffer> {
        self.shared.finished.get()
    }

    pub fn collect_assembled_frame_timeout(&self, timeout: Duration) -> Option<FrameBuffer> {
        self.shared.finished.get_timeout(timeout)
    }

    /// Close the inbox, join the workers and release frame collectors.
    pub fn shutdown(&self) {
        self.shared.inbox.close();
        let workers: Vec<_> = self.lock_workers().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                warn!("assembler worker panicked");
            }
        }
        self.shared.finished.close();
    }
}

impl Drop for FrameAssembler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
