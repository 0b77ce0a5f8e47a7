//! Tile encodings.
//!
//! Every encoded tile is a 24-byte [`TileHeader`] followed by a payload
//! whose format depends on the codec: packed little-endian RGBA for
//! [`RawCodec`], the same bytes zlib-compressed for [`DeflateCodec`], a
//! baseline JPEG of the colour channels for [`JpegCodec`].

use std::fmt;
use std::io::{Cursor, Read, Write};
use std::str::FromStr;
use std::sync::Arc;

use bincode::config::{Configuration, Fixint, LittleEndian};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::codecs::jpeg::{JpegDecoder, JpegEncoder};
use image::{ColorType, DynamicImage, ImageDecoder};
use serde::{Deserialize, Serialize};
use tilewall_types::{Eye, Region, Tile, TileHeader};

use crate::error::CodecError;
use crate::framing::MAX_FRAME_LEN;
use crate::message::Message;

fn header_config() -> Configuration<LittleEndian, Fixint> {
    bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}

/// Converts tiles to tile messages and back.
pub trait TileCodec: Send + Sync {
    fn name(&self) -> &'static str;
    fn encode(&self, tile: &Tile) -> Result<Message, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<Tile, CodecError>;
}

/// Serialize a tile header into its fixed 24-byte form.
pub fn encode_header(header: &TileHeader) -> Result<Vec<u8>, CodecError> {
    bincode::serde::encode_to_vec(header, header_config())
        .map_err(|e| CodecError::BadHeader(e.to_string()))
}

/// Parse and validate the header at the front of a tile message.
pub fn decode_header(bytes: &[u8]) -> Result<TileHeader, CodecError> {
    if bytes.len() < TileHeader::SIZE {
        return Err(CodecError::Truncated);
    }
    let (header, _): (TileHeader, usize) =
        bincode::serde::decode_from_slice(&bytes[..TileHeader::SIZE], header_config())
            .map_err(|e| CodecError::BadHeader(e.to_string()))?;
    if header.region.is_empty() {
        return Err(CodecError::BadHeader(format!("empty region {}", header.region)));
    }
    if Eye::from_wire(header.eye).is_none() {
        return Err(CodecError::BadHeader(format!("unknown eye {}", header.eye)));
    }
    // checked before any decoder sizes a buffer from the region
    let claimed = header.region.area().saturating_mul(4);
    if claimed > MAX_FRAME_LEN {
        return Err(CodecError::SizeMismatch {
            expected: claimed,
            actual: bytes.len() - TileHeader::SIZE,
        });
    }
    Ok(header)
}

fn tile_for(header: &TileHeader, pixels: Vec<u32>) -> Tile {
    Tile {
        region: header.region,
        // validated by decode_header
        eye: Eye::from_wire(header.eye).unwrap_or_default(),
        frame_id: header.frame_id,
        pixels,
    }
}

fn pixels_to_bytes(pixels: &[u32], out: &mut Vec<u8>) {
    out.reserve(pixels.len() * 4);
    for p in pixels {
        out.extend_from_slice(&p.to_le_bytes());
    }
}

fn bytes_to_pixels(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn check_tile(tile: &Tile) -> Result<(), CodecError> {
    if tile.region.is_empty() {
        return Err(CodecError::BadHeader(format!("empty region {}", tile.region)));
    }
    let expected = tile.region.area();
    if tile.pixels.len() != expected {
        return Err(CodecError::SizeMismatch {
            expected: expected.saturating_mul(4),
            actual: tile.pixels.len() * 4,
        });
    }
    Ok(())
}

/// Uncompressed packed RGBA.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl TileCodec for RawCodec {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn encode(&self, tile: &Tile) -> Result<Message, CodecError> {
        check_tile(tile)?;
        let mut bytes = encode_header(&tile.header())?;
        pixels_to_bytes(&tile.pixels, &mut bytes);
        Ok(Message::new(bytes))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Tile, CodecError> {
        let header = decode_header(bytes)?;
        let payload = &bytes[TileHeader::SIZE..];
        let expected = header.region.area() * 4;
        if payload.len() != expected {
            return Err(CodecError::SizeMismatch {
                expected,
                actual: payload.len(),
            });
        }
        Ok(tile_for(&header, bytes_to_pixels(payload)))
    }
}

/// zlib-compressed packed RGBA. Lossless.
#[derive(Debug, Clone, Copy)]
pub struct DeflateCodec {
    level: u32,
}

impl DeflateCodec {
    /// `level` is clamped to zlib's 0..=9.
    pub fn new(level: u32) -> Self {
        Self { level: level.min(9) }
    }
}

impl Default for DeflateCodec {
    fn default() -> Self {
        Self::new(1)
    }
}

impl TileCodec for DeflateCodec {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn encode(&self, tile: &Tile) -> Result<Message, CodecError> {
        check_tile(tile)?;
        let mut raw = Vec::new();
        pixels_to_bytes(&tile.pixels, &mut raw);

        let header = encode_header(&tile.header())?;
        let mut encoder = ZlibEncoder::new(header, Compression::new(self.level));
        encoder.write_all(&raw).map_err(CodecError::Compression)?;
        let bytes = encoder.finish().map_err(CodecError::Compression)?;
        Ok(Message::new(bytes))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Tile, CodecError> {
        let header = decode_header(bytes)?;
        let expected = header.region.area() * 4;
        let mut raw = Vec::new();
        ZlibDecoder::new(&bytes[TileHeader::SIZE..])
            .take(expected as u64 + 1)
            .read_to_end(&mut raw)
            .map_err(CodecError::Compression)?;
        if raw.len() != expected {
            return Err(CodecError::SizeMismatch {
                expected,
                actual: raw.len(),
            });
        }
        Ok(tile_for(&header, bytes_to_pixels(&raw)))
    }
}

/// Baseline JPEG of the RGB channels. Lossy; decoded alpha is always 0xff.
///
/// At the default quality of 75 flat areas come back within a few levels
/// per channel and smooth gradients within a small mean error.
#[derive(Debug, Clone, Copy)]
pub struct JpegCodec {
    quality: u8,
}

impl JpegCodec {
    /// `quality` is clamped to 1..=100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl Default for JpegCodec {
    fn default() -> Self {
        Self::new(75)
    }
}

fn jpeg_dimensions(region: &Region) -> Result<(u32, u32), CodecError> {
    let limit = u16::MAX as i32;
    if region.width() > limit || region.height() > limit {
        return Err(CodecError::BadHeader(format!(
            "region {} exceeds JPEG dimensions",
            region
        )));
    }
    Ok((region.width() as u32, region.height() as u32))
}

impl TileCodec for JpegCodec {
    fn name(&self) -> &'static str {
        "jpeg"
    }

    fn encode(&self, tile: &Tile) -> Result<Message, CodecError> {
        check_tile(tile)?;
        let (width, height) = jpeg_dimensions(&tile.region)?;
        let mut rgb = Vec::with_capacity(tile.pixels.len() * 3);
        for p in &tile.pixels {
            let [r, g, b, _] = p.to_le_bytes();
            rgb.extend_from_slice(&[r, g, b]);
        }

        let mut bytes = encode_header(&tile.header())?;
        JpegEncoder::new_with_quality(&mut bytes, self.quality).encode(
            &rgb,
            width,
            height,
            ColorType::Rgb8,
        )?;
        Ok(Message::new(bytes))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Tile, CodecError> {
        let header = decode_header(bytes)?;
        let expected = jpeg_dimensions(&header.region)?;
        let decoder = JpegDecoder::new(Cursor::new(&bytes[TileHeader::SIZE..]))?;
        let actual = decoder.dimensions();
        if actual != expected {
            return Err(CodecError::BadHeader(format!(
                "JPEG is {}x{}, header region {} is {}x{}",
                actual.0, actual.1, header.region, expected.0, expected.1
            )));
        }
        let rgb = DynamicImage::from_decoder(decoder)?.into_rgb8();
        let pixels = rgb
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                u32::from_le_bytes([r, g, b, 0xff])
            })
            .collect();
        Ok(tile_for(&header, pixels))
    }
}

/// Codec selection as it appears in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Raw,
    Deflate,
    Jpeg,
}

impl CodecKind {
    pub fn build(self) -> Arc<dyn TileCodec> {
        match self {
            CodecKind::Raw => Arc::new(RawCodec),
            CodecKind::Deflate => Arc::new(DeflateCodec::default()),
            CodecKind::Jpeg => Arc::new(JpegCodec::default()),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecKind::Raw => write!(f, "raw"),
            CodecKind::Deflate => write!(f, "deflate"),
            CodecKind::Jpeg => write!(f, "jpeg"),
        }
    }
}

impl FromStr for CodecKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(CodecKind::Raw),
            "deflate" | "zlib" => Ok(CodecKind::Deflate),
            "jpeg" | "jpg" => Ok(CodecKind::Jpeg),
            other => Err(format!("unknown codec '{}'", other)),
        }
    }
}
