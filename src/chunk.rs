//! Chunk store: given a chunk number, reads the slab, verifies CRC,
//! decompresses if needed; on write, compresses if beneficial, emits CRC,
//! records the offset. Delta (overwrite) chunks live in separate delta
//! segment files.

use crate::codec::{crc32, deflate, inflate};
use crate::error::{EwfError, Result};
use crate::offset_table::{OffsetEntry, OffsetTable};
use crate::section::{self, SectionKind};
use crate::segment::SegmentDirectory;
use std::io::{Read, Seek, SeekFrom, Write};

/// Reads chunk `chunk_number` (already located via `offset_table`), verifies
/// its CRC32, decompresses if flagged, and returns exactly `chunk_size`
/// plaintext bytes (fewer only for the image's very last chunk).
pub fn read_chunk(
    directory: &mut SegmentDirectory,
    offset_table: &OffsetTable,
    chunk_number: usize,
    chunk_size: usize,
) -> Result<Vec<u8>> {
    let entry = offset_table.get(chunk_number)?.clone();

    let file = if entry.is_delta {
        directory.delta_file(entry.segment_number)?
    } else {
        directory.evidence_file(entry.segment_number)?
    };

    file.seek(SeekFrom::Start(entry.file_offset))
        .map_err(|e| EwfError::io(format!("seeking to chunk {}", chunk_number), e))?;
    let mut scratch = vec![0u8; entry.compressed_size as usize];
    file.read_exact(&mut scratch)
        .map_err(|e| EwfError::io(format!("reading chunk {}", chunk_number), e))?;

    if entry.is_compressed {
        let plain = inflate(&scratch)?;
        if plain.len() < 4 {
            return Err(EwfError::Decompression {
                reason: format!("chunk {} decompressed to fewer than 4 bytes", chunk_number),
            });
        }
        let plain_len = plain.len() - 4;
        let stored_crc = u32::from_le_bytes(plain[plain_len..].try_into().unwrap());
        let computed_crc = crc32(&plain[..plain_len]);
        if stored_crc != computed_crc {
            return Err(EwfError::Checksum {
                chunk: chunk_number,
                stored: stored_crc,
                computed: computed_crc,
            });
        }
        // A shorter-than-chunk_size result is valid only for the image's
        // trailing chunk; the virtual stream is responsible for knowing
        // which chunk number that is and trims callers' reads accordingly.
        let _ = chunk_size;
        Ok(plain[..plain_len].to_vec())
    } else {
        if scratch.len() < 4 {
            return Err(EwfError::CorruptSegment {
                reason: format!("chunk {} slab is smaller than its CRC trailer", chunk_number),
            });
        }
        let plain_len = scratch.len() - 4;
        let stored_crc = u32::from_le_bytes(scratch[plain_len..].try_into().unwrap());
        let computed_crc = crc32(&scratch[..plain_len]);
        if stored_crc != computed_crc {
            return Err(EwfError::Checksum {
                chunk: chunk_number,
                stored: stored_crc,
                computed: computed_crc,
            });
        }
        Ok(scratch[..plain_len].to_vec())
    }
}

/// Compresses (if beneficial) and writes `plain` as chunk `chunk_number` to
/// the current segment file, appending a little-endian CRC32 trailer, and
/// updates `offset_table[chunk_number]` with the emitted location.
///
/// Returns the number of bytes emitted (descriptor-relative payload size).
pub fn write_chunk(
    directory: &mut SegmentDirectory,
    offset_table: &mut OffsetTable,
    chunk_number: usize,
    plain: &[u8],
    current_segment: u16,
    try_compress: bool,
) -> Result<u32> {
    let crc = crc32(plain);
    let file = directory.evidence_file(current_segment)?;
    let file_offset = file
        .stream_position()
        .map_err(|e| EwfError::io("querying write cursor", e))?;

    let (emitted, is_compressed) = if try_compress {
        let mut with_crc = Vec::with_capacity(plain.len() + 4);
        with_crc.extend_from_slice(plain);
        with_crc.extend_from_slice(&crc.to_le_bytes());
        let compressed = deflate(&with_crc)?;
        if compressed.len() <= plain.len() {
            (compressed, true)
        } else {
            let mut raw = Vec::with_capacity(plain.len() + 4);
            raw.extend_from_slice(plain);
            raw.extend_from_slice(&crc.to_le_bytes());
            (raw, false)
        }
    } else {
        let mut raw = Vec::with_capacity(plain.len() + 4);
        raw.extend_from_slice(plain);
        raw.extend_from_slice(&crc.to_le_bytes());
        (raw, false)
    };

    file.write_all(&emitted)
        .map_err(|e| EwfError::io(format!("writing chunk {}", chunk_number), e))?;

    offset_table.ensure_capacity(chunk_number + 1);
    let entry = offset_table.get_mut(chunk_number)?;
    *entry = OffsetEntry {
        segment_number: current_segment,
        file_offset,
        compressed_size: emitted.len() as u32,
        is_compressed,
        is_delta: false,
        dirty: false,
    };

    Ok(emitted.len() as u32)
}

/// Appends a `delta_chunk` section (`{chunk_number: u32, data, crc: u32}`)
/// to the current delta segment file and redirects
/// `offset_table[chunk_number]` to it.
pub fn write_delta_chunk(
    directory: &mut SegmentDirectory,
    offset_table: &mut OffsetTable,
    chunk_number: usize,
    plain: &[u8],
    delta_segment: u16,
) -> Result<()> {
    let crc = crc32(plain);
    let file = directory.delta_file(delta_segment)?;

    let payload_size = 4 + plain.len() as u64 + 4;
    let payload_offset = section::write_section(file, SectionKind::DeltaChunk, payload_size)?;

    file.write_all(&(chunk_number as u32).to_le_bytes())
        .map_err(|e| EwfError::io("writing delta chunk number", e))?;
    file.write_all(plain)
        .map_err(|e| EwfError::io("writing delta chunk data", e))?;
    file.write_all(&crc.to_le_bytes())
        .map_err(|e| EwfError::io("writing delta chunk CRC", e))?;

    offset_table.ensure_capacity(chunk_number + 1);
    let entry = offset_table.get_mut(chunk_number)?;
    *entry = OffsetEntry {
        segment_number: delta_segment,
        file_offset: payload_offset + 4,
        compressed_size: plain.len() as u32 + 4,
        is_compressed: false,
        is_delta: true,
        dirty: false,
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{OpenSegment, SegmentFileHeader, SegmentKind};
    use std::io::Write as _;
    use tempfile::tempfile;

    fn fresh_segment(segment_number: u16) -> OpenSegment {
        let mut file = tempfile().unwrap();
        let header = SegmentFileHeader {
            kind: SegmentKind::Evidence,
            segment_number,
        };
        file.write_all(&header.to_bytes()).unwrap();
        OpenSegment {
            path: std::path::PathBuf::new(),
            header,
            file,
        }
    }

    #[test]
    fn write_then_read_chunk_round_trips_uncompressed() {
        let mut directory = SegmentDirectory::default();
        directory.evidence.push(fresh_segment(1));
        let mut table = OffsetTable::default();

        let plain = vec![0xABu8; 64];
        write_chunk(&mut directory, &mut table, 0, &plain, 1, false).unwrap();

        let read_back = read_chunk(&mut directory, &table, 0, 64).unwrap();
        assert_eq!(read_back, plain);
    }

    #[test]
    fn write_then_read_chunk_round_trips_compressed() {
        let mut directory = SegmentDirectory::default();
        directory.evidence.push(fresh_segment(1));
        let mut table = OffsetTable::default();

        let plain = vec![0x41u8; 4096];
        write_chunk(&mut directory, &mut table, 0, &plain, 1, true).unwrap();
        assert!(table.get(0).unwrap().is_compressed);

        let read_back = read_chunk(&mut directory, &table, 0, 4096).unwrap();
        assert_eq!(read_back, plain);
    }

    #[test]
    fn corrupted_crc_is_detected() {
        let mut directory = SegmentDirectory::default();
        directory.evidence.push(fresh_segment(1));
        let mut table = OffsetTable::default();

        let plain = vec![0x11u8; 32];
        write_chunk(&mut directory, &mut table, 0, &plain, 1, false).unwrap();

        // Flip a byte inside the stored plaintext (not the CRC trailer).
        let entry = table.get(0).unwrap().clone();
        let file = directory.evidence_file(1).unwrap();
        file.seek(SeekFrom::Start(entry.file_offset)).unwrap();
        file.write_all(&[0xFF]).unwrap();

        let err = read_chunk(&mut directory, &table, 0, 32).unwrap_err();
        assert!(matches!(err, EwfError::Checksum { chunk: 0, .. }));
    }

    #[test]
    fn delta_chunk_round_trips() {
        let mut directory = SegmentDirectory::default();
        directory.evidence.push(fresh_segment(1));
        directory.delta.push(fresh_segment(1));
        let mut table = OffsetTable::default();

        let plain = vec![0xCCu8; 16];
        write_chunk(&mut directory, &mut table, 0, &vec![0x00u8; 16], 1, false).unwrap();
        write_delta_chunk(&mut directory, &mut table, 0, &plain, 1).unwrap();

        assert!(table.get(0).unwrap().is_delta);
        let read_back = read_chunk(&mut directory, &table, 0, 16).unwrap();
        assert_eq!(read_back, plain);
    }
}
