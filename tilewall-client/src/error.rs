//! Error types for render clients.

use std::fmt;

use tilewall_net::NetError;

#[derive(Debug)]
pub enum ClientError {
    /// The wall's info port could not be reached or read.
    InfoUnavailable { addr: String, source: NetError },
    Net(NetError),
    /// A tile with no pixels, or a pixel buffer too short for its layout.
    InvalidTile(String),
    /// The connection to the wall is gone.
    Disconnected,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InfoUnavailable { addr, source } => {
                write!(f, "no display wall info at {}: {}", addr, source)
            }
            Self::Net(e) => write!(f, "network error: {}", e),
            Self::InvalidTile(msg) => write!(f, "invalid tile: {}", msg),
            Self::Disconnected => write!(f, "disconnected from display wall"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InfoUnavailable { source, .. } => Some(source),
            Self::Net(e) => Some(e),
            _ => None,
        }
    }
}

impl From<NetError> for ClientError {
    fn from(e: NetError) -> Self {
        Self::Net(e)
    }
}
