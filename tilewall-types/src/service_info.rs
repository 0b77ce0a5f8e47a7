//! Wall description served by the info port.

use serde::{Deserialize, Serialize};

use crate::geometry::{Region, Vec2i};

/// One node that accepts tile connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Host name at which to reach this node.
    pub host_name: String,
    /// Port on which this node accepts client connections.
    pub port: i32,
    /// Pixels of the wall this node is responsible for.
    pub region: Region,
}

/// What a client needs to know before connecting to a wall.
///
/// With a head node, `nodes` holds a single entry covering the whole wall
/// even though several display nodes sit behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Session cookie; tile connections must present it.
    pub magic: u64,
    /// Total logical pixels of the wall, bezels included.
    pub total_pixels_in_wall: Vec2i,
    pub num_displays: Vec2i,
    pub stereo: bool,
    pub has_control_window: bool,
    pub control_window_size: Vec2i,
    pub nodes: Vec<NodeInfo>,
}

impl ServiceInfo {
    pub fn new(magic: u64) -> Self {
        Self {
            magic,
            total_pixels_in_wall: Vec2i::splat(-1),
            num_displays: Vec2i::default(),
            stereo: false,
            has_control_window: false,
            control_window_size: Vec2i::default(),
            nodes: Vec::new(),
        }
    }

    /// Indices of the nodes whose region overlaps `region`.
    pub fn nodes_overlapping(&self, region: &Region) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.region.overlaps(region))
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodes_overlapping_selects_by_region() {
        let mut info = ServiceInfo::new(1);
        for i in 0..3 {
            info.nodes.push(NodeInfo {
                host_name: format!("node{}", i),
                port: 4000 + i,
                region: Region::new(Vec2i::new(i * 10, 0), Vec2i::new(i * 10 + 10, 10)),
            });
        }
        let tile = Region::new(Vec2i::new(5, 0), Vec2i::new(15, 5));
        assert_eq!(info.nodes_overlapping(&tile), vec![0, 1]);
        let edge = Region::new(Vec2i::new(10, 0), Vec2i::new(20, 5));
        assert_eq!(info.nodes_overlapping(&edge), vec![1]);
    }
}
