//! Error types for the display service.

use std::fmt;

use tilewall_net::NetError;

/// Failure of the in-process rank group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    /// The other side of a rank channel is gone.
    Closed,
    /// No such rank in this group.
    InvalidRank(usize),
}

impl fmt::Display for GroupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "rank channel closed"),
            Self::InvalidRank(rank) => write!(f, "invalid rank {}", rank),
        }
    }
}

impl std::error::Error for GroupError {}

#[derive(Debug)]
pub enum ServiceError {
    Net(NetError),
    Group(GroupError),
    /// Configuration or rank layout that cannot be served.
    Config(String),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Net(e) => write!(f, "network error: {}", e),
            Self::Group(e) => write!(f, "rank group error: {}", e),
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Net(e) => Some(e),
            Self::Group(e) => Some(e),
            Self::Config(_) => None,
        }
    }
}

impl From<NetError> for ServiceError {
    fn from(e: NetError) -> Self {
        Self::Net(e)
    }
}

impl From<GroupError> for ServiceError {
    fn from(e: GroupError) -> Self {
        Self::Group(e)
    }
}
