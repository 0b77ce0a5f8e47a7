//! Opaque byte messages and their routing metadata.

use tilewall_types::{FrameId, TileHeader};

/// Index of a remote within a peer group, in the order the peers were given
/// (connect side) or accepted (listen side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub usize);

/// An encoded payload plus the peers it should be sent to.
///
/// Destinations only matter on the way out; received messages carry none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    bytes: Vec<u8>,
    destinations: Vec<PeerId>,
}

impl Message {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            destinations: Vec::new(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn destinations(&self) -> &[PeerId] {
        &self.destinations
    }

    pub fn set_destinations(&mut self, peers: Vec<PeerId>) {
        self.destinations = peers;
    }

    /// Frame id of a tile message, if the payload is long enough to hold one.
    pub fn frame_id(&self) -> Option<FrameId> {
        TileHeader::peek_frame_id(&self.bytes)
    }
}
