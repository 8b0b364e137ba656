//! Codec primitives shared by the section framer and the chunk store.
//!
//! CRC32 matches zlib's `crc32` (IEEE polynomial, via `crc32fast`). DEFLATE is
//! plain zlib with the default window (via `flate2`). MD5/SHA-1 are used only
//! to fill fixed-width metadata fields — this core records them, it does not
//! verify them against the payload.

use crate::error::{EwfError, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// CRC32 (IEEE) over `data`, matching the checksum embedded in both section
/// descriptors (Adler-32, see [`adler32`]) and chunk payloads (CRC32).
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Adler-32 checksum used by section descriptors and table headers.
///
/// Implemented directly (no external crate provides exactly this without
/// pulling in a zlib binding); the modulus and seed match the RFC 1950
/// definition used by the on-disk format.
pub fn adler32(data: &[u8]) -> u32 {
    const MOD_ADLER: u32 = 65521;
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for &byte in data {
        a = (a + byte as u32) % MOD_ADLER;
        b = (b + a) % MOD_ADLER;
    }
    (b << 16) | a
}

/// Inflates a zlib/DEFLATE stream fully into memory.
pub fn inflate(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| EwfError::Decompression {
            reason: e.to_string(),
        })?;
    Ok(out)
}

/// Deflates `plain` at the default zlib compression level.
pub fn deflate(plain: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(plain)
        .map_err(|e| EwfError::Decompression {
            reason: e.to_string(),
        })?;
    encoder.finish().map_err(|e| EwfError::Decompression {
        reason: e.to_string(),
    })
}

/// MD5 digest, recorded verbatim into `hash`/`xhash`/`digest` sections.
pub fn md5_digest(data: &[u8]) -> [u8; 16] {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-1 digest, recorded verbatim into `xhash`/`digest` sections.
pub fn sha1_digest(data: &[u8]) -> [u8; 20] {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adler32_matches_known_vector() {
        // "Wikipedia" -> 0x11E60398 is the canonical worked example.
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
    }

    #[test]
    fn crc32_of_empty_is_zero() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn deflate_inflate_round_trips() {
        let plain = b"the quick brown fox jumps over the lazy dog".repeat(8);
        let compressed = deflate(&plain).unwrap();
        let restored = inflate(&compressed).unwrap();
        assert_eq!(plain, restored);
    }

    #[test]
    fn md5_digest_matches_known_vector() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        let digest = md5_digest(b"");
        assert_eq!(
            digest,
            [
                0xd4, 0x1d, 0x8c, 0xd9, 0x8f, 0x00, 0xb2, 0x04, 0xe9, 0x80, 0x09, 0x98, 0xec,
                0xf8, 0x42, 0x7e
            ]
        );
    }
}
