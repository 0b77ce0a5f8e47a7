//! Length-prefixed framing for tile messages.
//!
//! Wire format: `[u32 length (little-endian)][payload]`

use std::io::Write;

use crate::connection::ConnectionReader;
use crate::error::NetError;

/// Largest payload we accept from a peer. One 8K RGBA stereo frame fits.
pub const MAX_FRAME_LEN: usize = 512 * 1024 * 1024;

/// Write one length-prefixed frame and flush it.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), NetError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(NetError::TooLarge(payload.len()));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed frame.
pub fn read_frame(reader: &mut ConnectionReader) -> Result<Vec<u8>, NetError> {
    let len = reader.read_u32()? as usize;
    if len > MAX_FRAME_LEN {
        return Err(NetError::TooLarge(len));
    }
    reader.read_exact(len)
}
