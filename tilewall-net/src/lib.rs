//! Network layer for tilewall.
//!
//! This crate moves frame-stamped pixel tiles between render clients and
//! display nodes: TCP connections and peer groups, the blocking frame
//! queues that feed the assemblers, the tile codecs, and the one-shot
//! wall-info protocol.

pub mod codec;
pub mod connection;
pub mod error;
pub mod framing;
pub mod info;
pub mod message;
pub mod peer_group;
pub mod queue;

pub use codec::{CodecKind, DeflateCodec, JpegCodec, RawCodec, TileCodec};
pub use connection::{Connection, ConnectionReader, ConnectionWriter, Listener, Readiness};
pub use error::{CodecError, NetError};
pub use info::{query_info, InfoServer};
pub use message::{Message, PeerId};
pub use peer_group::{GroupHealth, PeerGroup};
pub use queue::{FrameQueue, Inbox, StampedFrameQueue};
