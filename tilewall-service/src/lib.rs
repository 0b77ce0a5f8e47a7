//! Display-side service for tilewall.
//!
//! Each rank of a display wall runs a [`DisplayService`]: it accepts tile
//! streams from render clients (directly, or through a head node's
//! [`Dispatcher`]), assembles complete frames for its display with a
//! [`FrameAssembler`], and meets the other ranks at the end of every frame
//! so clients can be granted credit for the next one.

pub mod assembler;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod group;
pub mod layout;
pub mod service;

#[cfg(test)]
mod test_util;

pub use assembler::{FrameAssembler, FrameBuffer, FrameToBe};
pub use config::ServiceConfig;
pub use dispatcher::Dispatcher;
pub use error::{GroupError, ServiceError};
pub use group::{LocalGroup, ProcessGroup};
pub use layout::WallLayout;
pub use service::DisplayService;
