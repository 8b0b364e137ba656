//! Offset table: the dense per-chunk index built from `table`/`table2`
//! section pairs, grown on write.
//!
//! A `table` section payload is a 20-byte header (`chunk_count`, reserved,
//! `base_offset`, reserved, header Adler-32) followed by `chunk_count`
//! little-endian `u32` entries (bit 31 = `is_compressed`, low 31 bits =
//! offset relative to `base_offset`) and, for EnCase >= 2, a trailing
//! Adler-32 over the entries array.

use crate::codec::adler32;
use crate::error::{EwfError, Result};
use crate::section::{self, SectionKind};
use log::warn;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

pub const TABLE_HEADER_SIZE: u64 = 24;

/// One chunk's physical location.
#[derive(Debug, Clone, Default)]
pub struct OffsetEntry {
    pub segment_number: u16,
    pub file_offset: u64,
    pub compressed_size: u32,
    pub is_compressed: bool,
    pub is_delta: bool,
    pub dirty: bool,
}

/// The dense, growable chunk index for an entire multi-segment image.
#[derive(Debug, Default)]
pub struct OffsetTable {
    entries: Vec<OffsetEntry>,
}

/// Raw fields decoded from one `table`/`table2` payload, before being turned
/// into absolute [`OffsetEntry`] records (needs the following section's
/// start, or the segment's `sectors` end, to size the last entry).
#[derive(Debug, Clone)]
pub struct RawTableEntries {
    pub base_offset: u64,
    /// `(relative_offset, is_compressed)` per chunk, in order.
    pub entries: Vec<(u64, bool)>,
}

/// Parses the 20-byte table header plus the `chunk_count` entries at
/// `payload_offset` in `file`. Does not compute sizes — callers combine the
/// result with either the next section's start or the segment's `sectors`
/// end.
pub fn read_table_payload(file: &mut File, payload_offset: u64) -> Result<RawTableEntries> {
    file.seek(SeekFrom::Start(payload_offset))
        .map_err(|e| EwfError::io("seeking to table payload", e))?;

    let mut header = [0u8; TABLE_HEADER_SIZE as usize];
    file.read_exact(&mut header)
        .map_err(|e| EwfError::io("reading table header", e))?;

    let chunk_count = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let base_offset = u64::from_le_bytes(header[8..16].try_into().unwrap());
    let stored_header_adler = u32::from_le_bytes(header[20..24].try_into().unwrap());
    let computed_header_adler = adler32(&header[0..20]);
    if stored_header_adler != computed_header_adler {
        warn!(
            "table header Adler-32 mismatch at 0x{:x}: stored 0x{:08x}, computed 0x{:08x}",
            payload_offset, stored_header_adler, computed_header_adler
        );
    }

    let mut raw_entries = vec![0u8; chunk_count as usize * 4];
    file.read_exact(&mut raw_entries)
        .map_err(|e| EwfError::io("reading table entries", e))?;

    const COMPRESSED_FLAG: u32 = 0x8000_0000;
    let mut entries = Vec::with_capacity(chunk_count as usize);
    for chunk in raw_entries.chunks_exact(4) {
        let value = u32::from_le_bytes(chunk.try_into().unwrap());
        let relative_offset = (value & !COMPRESSED_FLAG) as u64;
        let is_compressed = value & COMPRESSED_FLAG != 0;
        entries.push((relative_offset, is_compressed));
    }

    Ok(RawTableEntries {
        base_offset,
        entries,
    })
}

/// Compares two decoded `table`/`table2` payloads for the same chunk range;
/// `table2` wins on any mismatch. Returns the entries to
/// use and whether a mismatch was found (a recoverable condition that the
/// caller should log).
pub fn reconcile_table_and_table2(
    table: RawTableEntries,
    table2: Option<RawTableEntries>,
) -> (RawTableEntries, bool) {
    match table2 {
        Some(backup) => {
            let mismatch = backup.base_offset != table.base_offset
                || backup.entries != table.entries;
            (backup, mismatch)
        }
        None => (table, false),
    }
}

impl OffsetTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, chunk: usize) -> Result<&OffsetEntry> {
        self.entries.get(chunk).ok_or_else(|| EwfError::NotFound {
            what: format!("chunk {}", chunk),
        })
    }

    pub fn get_mut(&mut self, chunk: usize) -> Result<&mut OffsetEntry> {
        self.entries
            .get_mut(chunk)
            .ok_or_else(|| EwfError::NotFound {
                what: format!("chunk {}", chunk),
            })
    }

    /// Appends one section's worth of resolved entries (absolute file
    /// offsets, with sizes already computed by the caller) to the dense
    /// table, in chunk order.
    pub fn extend(&mut self, entries: Vec<OffsetEntry>) {
        self.entries.extend(entries);
    }

    /// Grows the table to at least `n` entries with placeholder (unwritten)
    /// records; never shrinks. Used by the writer before a chunk is flushed.
    pub fn ensure_capacity(&mut self, n: usize) {
        if self.entries.len() < n {
            self.entries.resize_with(n, OffsetEntry::default);
        }
    }

    pub fn push(&mut self, entry: OffsetEntry) {
        self.entries.push(entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = &OffsetEntry> {
        self.entries.iter()
    }

    /// The entries for chunks `start_chunk..`, used by the writer to
    /// serialize the `table`/`table2` pair for the segment currently being
    /// closed.
    pub fn entries_from(&self, start_chunk: usize) -> &[OffsetEntry] {
        if start_chunk >= self.entries.len() {
            &[]
        } else {
            &self.entries[start_chunk..]
        }
    }
}

/// Writes a `table`/`table2` section payload for `entries` (one segment's
/// worth of chunks, contiguous from some `base_offset` anchor), mirroring
/// the layout [`read_table_payload`] decodes: a 20-byte header plus
/// `chunk_count` `u32` entries plus a trailing Adler-32 over the entries
/// array (EnCase >= 2 layout).
pub fn write_table_section(
    file: &mut File,
    kind: SectionKind,
    entries: &[OffsetEntry],
    base_offset: u64,
) -> Result<()> {
    let chunk_count = entries.len() as u32;
    let mut header = [0u8; TABLE_HEADER_SIZE as usize];
    header[0..4].copy_from_slice(&chunk_count.to_le_bytes());
    header[8..16].copy_from_slice(&base_offset.to_le_bytes());
    let header_adler = adler32(&header[0..20]);
    header[20..24].copy_from_slice(&header_adler.to_le_bytes());

    const COMPRESSED_FLAG: u32 = 0x8000_0000;
    let mut entries_bytes = Vec::with_capacity(entries.len() * 4 + 4);
    for entry in entries {
        let mut value = entry.file_offset.saturating_sub(base_offset) as u32;
        if entry.is_compressed {
            value |= COMPRESSED_FLAG;
        }
        entries_bytes.extend_from_slice(&value.to_le_bytes());
    }
    let entries_adler = adler32(&entries_bytes);
    entries_bytes.extend_from_slice(&entries_adler.to_le_bytes());

    let payload_size = header.len() as u64 + entries_bytes.len() as u64;
    section::write_section(file, kind, payload_size)?;
    file.write_all(&header)
        .map_err(|e| EwfError::io("writing table section header", e))?;
    file.write_all(&entries_bytes)
        .map_err(|e| EwfError::io("writing table section entries", e))?;
    Ok(())
}

/// Given one segment's decoded (and table2-reconciled) table entries plus
/// the end-of-payload offset that bounds the final chunk (the `sectors`
/// section's end for EnCase >= 2, or this table section's own end for
/// SMART/EnCase 1), computes each entry's `compressed_size` and turns the
/// relative offsets into absolute [`OffsetEntry`] records.
pub fn resolve_entries(
    raw: &RawTableEntries,
    segment_number: u16,
    section_end: u64,
) -> Vec<OffsetEntry> {
    let mut resolved = Vec::with_capacity(raw.entries.len());
    for (i, &(relative_offset, is_compressed)) in raw.entries.iter().enumerate() {
        let absolute_offset = raw.base_offset + relative_offset;
        let next_absolute = if i + 1 < raw.entries.len() {
            raw.base_offset + raw.entries[i + 1].0
        } else {
            section_end
        };
        let compressed_size = next_absolute.saturating_sub(absolute_offset) as u32;
        resolved.push(OffsetEntry {
            segment_number,
            file_offset: absolute_offset,
            compressed_size,
            is_compressed,
            is_delta: false,
            dirty: false,
        });
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_capacity_never_shrinks() {
        let mut table = OffsetTable::default();
        table.ensure_capacity(4);
        assert_eq!(table.len(), 4);
        table.push(OffsetEntry::default());
        table.ensure_capacity(2);
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn resolve_entries_computes_successor_sizes() {
        let raw = RawTableEntries {
            base_offset: 1000,
            entries: vec![(0, false), (512, true), (1024, false)],
        };
        let resolved = resolve_entries(&raw, 1, 2048);
        assert_eq!(resolved[0].file_offset, 1000);
        assert_eq!(resolved[0].compressed_size, 512);
        assert_eq!(resolved[1].file_offset, 1512);
        assert_eq!(resolved[1].compressed_size, 512);
        assert!(resolved[1].is_compressed);
        assert_eq!(resolved[2].file_offset, 2024);
        assert_eq!(resolved[2].compressed_size, 24);
    }

    #[test]
    fn reconcile_prefers_table2_on_mismatch() {
        let table = RawTableEntries {
            base_offset: 0,
            entries: vec![(0, false)],
        };
        let table2 = RawTableEntries {
            base_offset: 0,
            entries: vec![(4, false)],
        };
        let (chosen, mismatch) = reconcile_table_and_table2(table, Some(table2.clone()));
        assert!(mismatch);
        assert_eq!(chosen.entries, table2.entries);
    }

    #[test]
    fn reconcile_no_mismatch_when_identical() {
        let table = RawTableEntries {
            base_offset: 0,
            entries: vec![(0, false)],
        };
        let (_, mismatch) = reconcile_table_and_table2(table.clone(), Some(table));
        assert!(!mismatch);
    }

    #[test]
    fn write_then_read_table_section_round_trips() {
        use tempfile::tempfile;

        let entries = vec![
            OffsetEntry {
                segment_number: 1,
                file_offset: 1000,
                compressed_size: 100,
                is_compressed: false,
                is_delta: false,
                dirty: false,
            },
            OffsetEntry {
                segment_number: 1,
                file_offset: 1100,
                compressed_size: 50,
                is_compressed: true,
                is_delta: false,
                dirty: false,
            },
        ];
        let mut file = tempfile().unwrap();
        write_table_section(&mut file, SectionKind::Table, &entries, 1000).unwrap();

        file.seek(SeekFrom::Start(0)).unwrap();
        let section = section::read_section_header(&mut file, 0).unwrap();
        assert_eq!(section.kind, SectionKind::Table);

        let raw = read_table_payload(&mut file, section.payload_offset).unwrap();
        assert_eq!(raw.base_offset, 1000);
        assert_eq!(raw.entries, vec![(0, false), (100, true)]);
    }
}
