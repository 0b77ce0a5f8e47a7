//! Error types for the network layer.

use std::fmt;
use std::io;

/// Failure of a connection, handshake or transfer.
#[derive(Debug)]
pub enum NetError {
    /// Transport setup failed (DNS, bind conflict, refused connection).
    Connection { addr: String, source: io::Error },
    /// The remote closed the stream; detected on a zero-length read.
    PeerDisconnected,
    /// Cookie or peer-count mismatch during the handshake.
    ProtocolMismatch(String),
    /// Any other I/O failure on an established connection.
    Io(io::Error),
    /// A tile message could not be encoded or decoded.
    Codec(CodecError),
    /// A length prefix announced more bytes than we accept.
    TooLarge(usize),
    /// The peer group has not finished connecting yet.
    NotReady,
    /// The component was shut down while the call was waiting.
    Shutdown,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection { addr, source } => write!(f, "cannot connect to {}: {}", addr, source),
            Self::PeerDisconnected => write!(f, "peer disconnected"),
            Self::ProtocolMismatch(msg) => write!(f, "protocol mismatch: {}", msg),
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Codec(e) => write!(f, "codec error: {}", e),
            Self::TooLarge(len) => write!(f, "message too large: {} bytes", len),
            Self::NotReady => write!(f, "peer group is still connecting"),
            Self::Shutdown => write!(f, "shut down"),
        }
    }
}

impl std::error::Error for NetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connection { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for NetError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<CodecError> for NetError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

/// Failure to turn a tile into wire bytes or back.
#[derive(Debug)]
pub enum CodecError {
    /// Fewer bytes than a tile header.
    Truncated,
    /// Header fields are out of range (empty region, unknown eye).
    BadHeader(String),
    /// Payload size does not match the header's region.
    SizeMismatch { expected: usize, actual: usize },
    /// The compressor or decompressor failed.
    Compression(io::Error),
    /// The JPEG encoder or decoder failed.
    Image(image::ImageError),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "message shorter than tile header"),
            Self::BadHeader(msg) => write!(f, "bad tile header: {}", msg),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "payload size mismatch: expected {} bytes, got {}", expected, actual)
            }
            Self::Compression(e) => write!(f, "compression error: {}", e),
            Self::Image(e) => write!(f, "image codec error: {}", e),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Compression(e) => Some(e),
            Self::Image(e) => Some(e),
            _ => None,
        }
    }
}

impl From<image::ImageError> for CodecError {
    fn from(e: image::ImageError) -> Self {
        Self::Image(e)
    }
}
