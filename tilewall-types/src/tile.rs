//! Frame-stamped pixel tiles.

use serde::{Deserialize, Serialize};

use crate::geometry::Region;

/// Frame counter shared by producers and display nodes. 32-bit on the wire.
pub type FrameId = i32;

/// Which eye a tile belongs to. Mono walls only ever use `Left`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Eye {
    #[default]
    Left,
    Right,
}

impl Eye {
    pub fn index(self) -> usize {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }

    pub fn to_wire(self) -> i32 {
        self.index() as i32
    }

    pub fn from_wire(v: i32) -> Option<Eye> {
        match v {
            0 => Some(Eye::Left),
            1 => Some(Eye::Right),
            _ => None,
        }
    }
}

/// Fixed-layout header in front of every encoded tile payload.
///
/// Field order is the wire order: frame id, region (lower.x, lower.y,
/// upper.x, upper.y), eye.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileHeader {
    pub frame_id: FrameId,
    pub region: Region,
    pub eye: i32,
}

impl TileHeader {
    /// Encoded size in bytes: six 32-bit integers.
    pub const SIZE: usize = 24;

    /// Read only the frame id (first four little-endian bytes) of an encoded tile.
    pub fn peek_frame_id(bytes: &[u8]) -> Option<FrameId> {
        let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        Some(i32::from_le_bytes(raw))
    }
}

/// A rectangle of packed RGBA pixels for one eye of one frame.
///
/// `pixels` is row-major and tightly packed: its pitch is always the
/// region's width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub region: Region,
    pub eye: Eye,
    pub frame_id: FrameId,
    pub pixels: Vec<u32>,
}

impl Tile {
    /// A zero-filled tile covering `region`.
    pub fn new(region: Region, eye: Eye, frame_id: FrameId) -> Self {
        Self {
            region,
            eye,
            frame_id,
            pixels: vec![0; region.area()],
        }
    }

    /// Copy a `region`-sized rectangle out of `src`, whose rows are `pitch`
    /// pixels apart. Returns `None` if `src` is too short for that layout.
    pub fn copy_from(
        region: Region,
        eye: Eye,
        frame_id: FrameId,
        src: &[u32],
        pitch: usize,
    ) -> Option<Self> {
        let width = region.width().max(0) as usize;
        let height = region.height().max(0) as usize;
        if width == 0 || height == 0 || pitch < width {
            return None;
        }
        if width.checked_mul(height) != Some(region.area()) {
            // wider than an i32 can describe
            return None;
        }
        let needed = (height - 1).checked_mul(pitch)?.checked_add(width)?;
        if src.len() < needed {
            return None;
        }

        let mut pixels = Vec::with_capacity(width * height);
        for row in src.chunks(pitch).take(height) {
            pixels.extend_from_slice(&row[..width]);
        }
        Some(Self {
            region,
            eye,
            frame_id,
            pixels,
        })
    }

    /// Row pitch of the owned buffer, in pixels.
    pub fn pitch(&self) -> usize {
        self.region.width().max(0) as usize
    }

    pub fn header(&self) -> TileHeader {
        TileHeader {
            frame_id: self.frame_id,
            region: self.region,
            eye: self.eye.to_wire(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Vec2i;

    #[test]
    fn copy_from_honours_pitch() {
        // 3x2 rectangle out of a buffer with 5-pixel rows
        let src: Vec<u32> = (0..10).collect();
        let region = Region::new(Vec2i::new(10, 20), Vec2i::new(13, 22));
        let tile = Tile::copy_from(region, Eye::Left, 7, &src, 5).unwrap();
        assert_eq!(tile.pixels, vec![0, 1, 2, 5, 6, 7]);
        assert_eq!(tile.pitch(), 3);
        assert_eq!(tile.frame_id, 7);
    }

    #[test]
    fn copy_from_rejects_short_buffer() {
        let region = Region::new(Vec2i::new(0, 0), Vec2i::new(4, 4));
        assert!(Tile::copy_from(region, Eye::Left, 0, &[0; 15], 4).is_none());
        assert!(Tile::copy_from(region, Eye::Left, 0, &[0; 16], 3).is_none());
    }

    #[test]
    fn copy_from_survives_absurd_layouts() {
        let region = Region::new(Vec2i::new(0, 0), Vec2i::new(2, 2));
        assert!(Tile::copy_from(region, Eye::Left, 0, &[0; 4], usize::MAX).is_none());
        let wide = Region::new(Vec2i::new(i32::MIN, 0), Vec2i::new(i32::MAX, 2));
        assert!(Tile::copy_from(wide, Eye::Left, 0, &[0; 4], 2).is_none());
    }

    #[test]
    fn peek_frame_id_reads_little_endian() {
        let mut bytes = 5i32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[9; 20]);
        assert_eq!(TileHeader::peek_frame_id(&bytes), Some(5));
        assert_eq!(TileHeader::peek_frame_id(&[1, 2]), None);
    }

    #[test]
    fn eye_wire_values() {
        assert_eq!(Eye::from_wire(0), Some(Eye::Left));
        assert_eq!(Eye::from_wire(1), Some(Eye::Right));
        assert_eq!(Eye::from_wire(2), None);
        assert_eq!(Eye::Right.to_wire(), 1);
    }
}
