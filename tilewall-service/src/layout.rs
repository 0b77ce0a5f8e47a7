//! Mapping from display numbers to wall pixels.

use tilewall_types::{Region, Vec2i};

/// A grid of equally sized displays separated by bezels.
///
/// Display `n` sits at grid position `(n % cols, n / cols)`. Bezel pixels
/// belong to the wall's logical pixel space but to no display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallLayout {
    num_displays: Vec2i,
    window_size: Vec2i,
    bezel: Vec2i,
}

impl WallLayout {
    pub fn new(num_displays: Vec2i, window_size: Vec2i, bezel: Vec2i) -> Self {
        Self {
            num_displays,
            window_size,
            bezel,
        }
    }

    pub fn num_displays(&self) -> Vec2i {
        self.num_displays
    }

    pub fn window_size(&self) -> Vec2i {
        self.window_size
    }

    pub fn bezel(&self) -> Vec2i {
        self.bezel
    }

    pub fn display_count(&self) -> usize {
        self.num_displays.product().max(0) as usize
    }

    /// Pixels of display `display`; [`Region::EMPTY`] for negative numbers.
    pub fn region_of_display(&self, display: i32) -> Region {
        if display < 0 || self.num_displays.x < 1 {
            return Region::EMPTY;
        }
        let grid = Vec2i::new(display % self.num_displays.x, display / self.num_displays.x);
        let lower = grid * (self.window_size + self.bezel);
        Region::from_origin_size(lower, self.window_size)
    }

    /// Logical size of the whole wall, bezels included.
    pub fn total_pixels(&self) -> Vec2i {
        self.num_displays * self.window_size + (self.num_displays - Vec2i::splat(1)) * self.bezel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_step_over_bezels() {
        let layout = WallLayout::new(Vec2i::new(3, 2), Vec2i::new(100, 50), Vec2i::new(10, 4));
        assert_eq!(layout.display_count(), 6);
        assert_eq!(
            layout.region_of_display(0),
            Region::new(Vec2i::new(0, 0), Vec2i::new(100, 50))
        );
        assert_eq!(
            layout.region_of_display(2),
            Region::new(Vec2i::new(220, 0), Vec2i::new(320, 50))
        );
        assert_eq!(
            layout.region_of_display(4),
            Region::new(Vec2i::new(110, 54), Vec2i::new(210, 104))
        );
        assert_eq!(layout.total_pixels(), Vec2i::new(320, 104));
    }

    #[test]
    fn negative_display_has_no_pixels() {
        let layout = WallLayout::new(Vec2i::new(2, 1), Vec2i::new(10, 10), Vec2i::default());
        assert_eq!(layout.region_of_display(-1), Region::EMPTY);
        assert!(layout.region_of_display(-1).is_empty());
    }

    #[test]
    fn display_regions_never_overlap() {
        let layout = WallLayout::new(Vec2i::new(3, 3), Vec2i::new(64, 48), Vec2i::new(2, 2));
        for a in 0..9 {
            for b in 0..9 {
                let overlap = layout.region_of_display(a).overlaps(&layout.region_of_display(b));
                assert_eq!(overlap, a == b, "displays {} and {}", a, b);
            }
        }
    }
}
