//! Integer 2-D vectors and regions over the wall's pixel grid.

use std::fmt;
use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// A pair of signed pixel coordinates (or extents).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vec2i {
    pub x: i32,
    pub y: i32,
}

impl Vec2i {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Both components set to `v`.
    pub const fn splat(v: i32) -> Self {
        Self { x: v, y: v }
    }

    pub fn product(self) -> i64 {
        self.x as i64 * self.y as i64
    }
}

impl Add for Vec2i {
    type Output = Vec2i;
    fn add(self, rhs: Vec2i) -> Vec2i {
        Vec2i::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2i {
    type Output = Vec2i;
    fn sub(self, rhs: Vec2i) -> Vec2i {
        Vec2i::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul for Vec2i {
    type Output = Vec2i;
    fn mul(self, rhs: Vec2i) -> Vec2i {
        Vec2i::new(self.x * rhs.x, self.y * rhs.y)
    }
}

impl fmt::Display for Vec2i {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// Axis-aligned rectangle: `lower` is inclusive, `upper` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub lower: Vec2i,
    pub upper: Vec2i,
}

impl Region {
    /// Placeholder region for ranks that own no pixels (e.g. a head node).
    pub const EMPTY: Region = Region {
        lower: Vec2i::splat(-1),
        upper: Vec2i::splat(-1),
    };

    pub const fn new(lower: Vec2i, upper: Vec2i) -> Self {
        Self { lower, upper }
    }

    /// Region at `origin` spanning `size` pixels.
    pub fn from_origin_size(origin: Vec2i, size: Vec2i) -> Self {
        Self::new(origin, origin + size)
    }

    /// Extent in both axes, saturating at the `i32` range.
    pub fn size(&self) -> Vec2i {
        Vec2i::new(self.width(), self.height())
    }

    pub fn width(&self) -> i32 {
        span(self.lower.x, self.upper.x)
    }

    pub fn height(&self) -> i32 {
        span(self.lower.y, self.upper.y)
    }

    pub fn is_empty(&self) -> bool {
        self.upper.x <= self.lower.x || self.upper.y <= self.lower.y
    }

    /// Pixel count; zero for empty regions. Exact for any pair of corners.
    pub fn area(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let w = (self.upper.x as i64 - self.lower.x as i64) as u64;
        let h = (self.upper.y as i64 - self.lower.y as i64) as u64;
        usize::try_from(w * h).unwrap_or(usize::MAX)
    }

    /// Whether the two regions share at least one pixel. Touching edges do not count.
    pub fn overlaps(&self, other: &Region) -> bool {
        if self.upper.x <= other.lower.x {
            return false;
        }
        if self.upper.y <= other.lower.y {
            return false;
        }
        if self.lower.x >= other.upper.x {
            return false;
        }
        if self.lower.y >= other.upper.y {
            return false;
        }
        // A degenerate region has no pixels to share.
        !self.is_empty() && !other.is_empty()
    }

    /// The shared pixels of both regions, if any.
    pub fn intersection(&self, other: &Region) -> Option<Region> {
        let clipped = Region::new(
            Vec2i::new(self.lower.x.max(other.lower.x), self.lower.y.max(other.lower.y)),
            Vec2i::new(self.upper.x.min(other.upper.x), self.upper.y.min(other.upper.y)),
        );
        if clipped.is_empty() {
            None
        } else {
            Some(clipped)
        }
    }
}

fn span(lower: i32, upper: i32) -> i32 {
    (upper as i64 - lower as i64).clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}-{}}}", self.lower, self.upper)
    }
}
