//! # tilewall-types
//!
//! Shared type definitions for the tilewall display-wall streaming stack.
//! This crate contains the geometry, tile and wall-description types used by
//! tilewall-net, tilewall-service and tilewall-client.

mod geometry;
mod service_info;
mod tile;

pub use geometry::{Region, Vec2i};
pub use service_info::{NodeInfo, ServiceInfo};
pub use tile::{Eye, FrameId, Tile, TileHeader};
