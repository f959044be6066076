//! Zstd compression for stored chunk payloads
//!
//! Payloads are standard Zstd frames. Concatenated frames decode as one stream,
//! which is what lets the reconstructor batch many chunks through one decoder.

use crate::error::ChunkError;
use std::io::{Read, Write};

/// Compression level applied to every new chunk
pub const DEFAULT_LEVEL: i32 = 3;

/// Compress one chunk into a single Zstd frame.
pub fn compress(data: &[u8], level: i32) -> Result<Vec<u8>, ChunkError> {
    zstd::encode_all(data, level).map_err(|e| ChunkError::CompressionFailed(e.to_string()))
}

/// Decompress a buffer of one or more Zstd frames.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, ChunkError> {
    zstd::decode_all(data).map_err(|e| ChunkError::DecompressionFailed(e.to_string()))
}

/// Stream-decompress a buffer of one or more frames straight into `out`.
/// Returns the number of decompressed bytes written.
pub fn decompress_into<W: Write>(data: &[u8], out: &mut W) -> Result<u64, ChunkError> {
    let mut counter = CountingWriter { inner: out, written: 0 };
    zstd::stream::copy_decode(data, &mut counter)
        .map_err(|e| ChunkError::DecompressionFailed(e.to_string()))?;
    Ok(counter.written)
}

/// True when `data` decodes to zero bytes. A zero-length buffer counts as
/// empty even though it is not a valid frame.
pub fn decodes_empty(data: &[u8]) -> Result<bool, ChunkError> {
    if data.is_empty() {
        return Ok(true);
    }
    let mut decoder =
        zstd::stream::read::Decoder::new(data).map_err(|e| ChunkError::DecompressionFailed(e.to_string()))?;
    let mut first = [0u8; 1];
    let n = decoder
        .read(&mut first)
        .map_err(|e| ChunkError::DecompressionFailed(e.to_string()))?;
    Ok(n == 0)
}

struct CountingWriter<'a, W: Write> {
    inner: &'a mut W,
    written: u64,
}

impl<W: Write> Write for CountingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
