use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::error::CompressionError;

/// Raw deflate, no zlib header.
pub fn deflate(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), Compression::best());
    encoder.write_all(data).map_err(CompressionError::Deflate)?;
    encoder.finish().map_err(CompressionError::Deflate)
}

/// Inflates `data`, refusing output larger than `limit` bytes.
pub fn inflate(data: &[u8], limit: usize) -> Result<Vec<u8>, CompressionError> {
    let mut output = Vec::new();
    DeflateDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut output)
        .map_err(CompressionError::Inflate)?;
    if output.len() > limit {
        return Err(CompressionError::SizeExceeded { limit });
    }
    Ok(output)
}
