//! Section framer: reads/writes the 76-byte section descriptor and walks a
//! segment file as a linked list of `(type, size, next_offset)`.

use crate::codec::adler32;
use crate::error::{EwfError, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

/// Size in bytes of a section descriptor.
pub const SECTION_DESCRIPTOR_SIZE: u64 = 76;

/// Tagged dispatch over the 16-byte ASCII section type, replacing the
/// source's chain of `if`/`else` string comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Header,
    Header2,
    XHeader,
    Volume,
    Disk,
    Data,
    Sectors,
    Table,
    Table2,
    Next,
    Done,
    Hash,
    XHash,
    Error2,
    Session,
    Ltree,
    SingleFiles,
    DeltaChunk,
    Digest,
    Unknown,
}

impl SectionKind {
    pub fn parse(tag: &str) -> SectionKind {
        match tag {
            "header" => SectionKind::Header,
            "header2" => SectionKind::Header2,
            "xheader" => SectionKind::XHeader,
            "volume" => SectionKind::Volume,
            "disk" => SectionKind::Disk,
            "data" => SectionKind::Data,
            "sectors" => SectionKind::Sectors,
            "table" => SectionKind::Table,
            "table2" => SectionKind::Table2,
            "next" => SectionKind::Next,
            "done" => SectionKind::Done,
            "hash" => SectionKind::Hash,
            "xhash" => SectionKind::XHash,
            "error2" => SectionKind::Error2,
            "session" => SectionKind::Session,
            "ltree" => SectionKind::Ltree,
            "single_files" => SectionKind::SingleFiles,
            "delta_chunk" => SectionKind::DeltaChunk,
            "digest" => SectionKind::Digest,
            _ => SectionKind::Unknown,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            SectionKind::Header => "header",
            SectionKind::Header2 => "header2",
            SectionKind::XHeader => "xheader",
            SectionKind::Volume => "volume",
            SectionKind::Disk => "disk",
            SectionKind::Data => "data",
            SectionKind::Sectors => "sectors",
            SectionKind::Table => "table",
            SectionKind::Table2 => "table2",
            SectionKind::Next => "next",
            SectionKind::Done => "done",
            SectionKind::Hash => "hash",
            SectionKind::XHash => "xhash",
            SectionKind::Error2 => "error2",
            SectionKind::Session => "session",
            SectionKind::Ltree => "ltree",
            SectionKind::SingleFiles => "single_files",
            SectionKind::DeltaChunk => "delta_chunk",
            SectionKind::Digest => "digest",
            SectionKind::Unknown => "",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SectionKind::Next | SectionKind::Done)
    }
}

/// A parsed section descriptor plus the absolute offsets needed to locate its
/// payload.
#[derive(Debug, Clone)]
pub struct SectionRef {
    pub kind: SectionKind,
    pub raw_type: String,
    /// Absolute offset of this descriptor within the segment file.
    pub descriptor_offset: u64,
    /// Absolute offset of the first payload byte.
    pub payload_offset: u64,
    /// Size of the payload only (`size` minus the descriptor size).
    pub payload_size: u64,
    /// Absolute offset of the next section descriptor (self-referencing on
    /// the terminal section).
    pub next_offset: u64,
}

/// Reads and validates the 76-byte descriptor at `at`, returning its parsed
/// fields. Fails with [`EwfError::CorruptSegment`] when the descriptor's own
/// Adler-32 (over bytes 0..72) does not match, or when `size` is impossibly
/// small.
pub fn read_section_header(file: &mut File, at: u64) -> Result<SectionRef> {
    let mut descriptor = [0u8; SECTION_DESCRIPTOR_SIZE as usize];
    file.seek(SeekFrom::Start(at))
        .map_err(|e| EwfError::io(format!("seeking to section descriptor at 0x{:x}", at), e))?;
    file.read_exact(&mut descriptor)
        .map_err(|e| EwfError::io(format!("reading section descriptor at 0x{:x}", at), e))?;

    let stored_adler = u32::from_le_bytes(descriptor[72..76].try_into().unwrap());
    let computed_adler = adler32(&descriptor[0..72]);
    if stored_adler != computed_adler {
        return Err(EwfError::CorruptSegment {
            reason: format!(
                "section descriptor at 0x{:x} has Adler-32 0x{:08x}, expected 0x{:08x}",
                at, stored_adler, computed_adler
            ),
        });
    }

    let mut raw_type = String::from_utf8_lossy(&descriptor[0..16]).into_owned();
    raw_type.retain(|c| c != '\0');

    let next_offset = u64::from_le_bytes(descriptor[16..24].try_into().unwrap());
    let size = u64::from_le_bytes(descriptor[24..32].try_into().unwrap());

    if size < SECTION_DESCRIPTOR_SIZE {
        return Err(EwfError::CorruptSegment {
            reason: format!(
                "section '{}' at 0x{:x} declares impossible size {}",
                raw_type, at, size
            ),
        });
    }

    Ok(SectionRef {
        kind: SectionKind::parse(&raw_type),
        raw_type,
        descriptor_offset: at,
        payload_offset: at + SECTION_DESCRIPTOR_SIZE,
        payload_size: size - SECTION_DESCRIPTOR_SIZE,
        next_offset,
    })
}

/// Walks `file` starting at `start` (13 for an evidence/logical segment, past
/// its file header) yielding every [`SectionRef`] until a section references
/// itself. The self-referencing terminal section (`next`/`done`) is included.
///
/// Any descriptor whose `next_offset` does not strictly increase (except the
/// terminal self-reference) is fatal.
pub fn iterate_sections(file: &mut File, start: u64) -> Result<Vec<SectionRef>> {
    let mut sections = Vec::new();
    let mut current = start;
    loop {
        let section = read_section_header(file, current)?;
        let next = section.next_offset;
        let terminal = next == current || section.kind.is_terminal();
        sections.push(section);

        if terminal {
            break;
        }
        if next <= current {
            return Err(EwfError::CorruptSegment {
                reason: format!(
                    "section chain is not strictly increasing: 0x{:x} -> 0x{:x}",
                    current, next
                ),
            });
        }
        current = next;
    }
    Ok(sections)
}

/// Writes a section descriptor for a payload of `payload_size` bytes at the
/// file's current position, computing `next_offset` and the descriptor's
/// Adler-32 last. Returns the absolute offset at which the caller should now
/// write the payload.
pub fn write_section(file: &mut File, kind: SectionKind, payload_size: u64) -> Result<u64> {
    let descriptor_offset = file
        .stream_position()
        .map_err(|e| EwfError::io("querying current write position", e))?;
    let payload_offset = descriptor_offset + SECTION_DESCRIPTOR_SIZE;
    let next_offset = if kind.is_terminal() {
        descriptor_offset
    } else {
        payload_offset + payload_size
    };

    let mut descriptor = [0u8; SECTION_DESCRIPTOR_SIZE as usize];
    let tag = kind.tag().as_bytes();
    descriptor[0..tag.len().min(16)].copy_from_slice(&tag[..tag.len().min(16)]);
    descriptor[16..24].copy_from_slice(&next_offset.to_le_bytes());
    descriptor[24..32].copy_from_slice(&(SECTION_DESCRIPTOR_SIZE + payload_size).to_le_bytes());
    // bytes 32..72 stay zeroed (reserved).
    let adler = adler32(&descriptor[0..72]);
    descriptor[72..76].copy_from_slice(&adler.to_le_bytes());

    file.write_all(&descriptor)
        .map_err(|e| EwfError::io(format!("writing '{}' section descriptor", kind.tag()), e))?;

    Ok(payload_offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempfile;

    fn write_raw_descriptor(
        file: &mut File,
        at: u64,
        tag: &str,
        next_offset: u64,
        size: u64,
        corrupt_adler: bool,
    ) {
        let mut descriptor = [0u8; 76];
        let bytes = tag.as_bytes();
        descriptor[0..bytes.len()].copy_from_slice(bytes);
        descriptor[16..24].copy_from_slice(&next_offset.to_le_bytes());
        descriptor[24..32].copy_from_slice(&size.to_le_bytes());
        let mut adler = adler32(&descriptor[0..72]);
        if corrupt_adler {
            adler ^= 0xFFFF_FFFF;
        }
        descriptor[72..76].copy_from_slice(&adler.to_le_bytes());
        file.seek(SeekFrom::Start(at)).unwrap();
        file.write_all(&descriptor).unwrap();
    }

    #[test]
    fn reads_well_formed_descriptor() {
        let mut file = tempfile().unwrap();
        write_raw_descriptor(&mut file, 0, "volume", 76 + 10, 76 + 10, false);
        let section = read_section_header(&mut file, 0).unwrap();
        assert_eq!(section.kind, SectionKind::Volume);
        assert_eq!(section.payload_size, 10);
        assert_eq!(section.payload_offset, 76);
    }

    #[test]
    fn rejects_bad_adler() {
        let mut file = tempfile().unwrap();
        write_raw_descriptor(&mut file, 0, "volume", 86, 86, true);
        let err = read_section_header(&mut file, 0).unwrap_err();
        assert!(matches!(err, EwfError::CorruptSegment { .. }));
    }

    #[test]
    fn iterate_stops_on_self_reference() {
        let mut file = tempfile().unwrap();
        write_raw_descriptor(&mut file, 0, "volume", 76, 76 + 20, false);
        write_raw_descriptor(&mut file, 76, "done", 76, 76, false);
        let sections = iterate_sections(&mut file, 0).unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].kind, SectionKind::Done);
    }

    #[test]
    fn iterate_rejects_non_increasing_chain() {
        let mut file = tempfile().unwrap();
        write_raw_descriptor(&mut file, 0, "volume", 0, 76 + 20, false);
        let err = iterate_sections(&mut file, 0).unwrap_err();
        assert!(matches!(err, EwfError::CorruptSegment { .. }));
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut file = tempfile().unwrap();
        let payload_offset = write_section(&mut file, SectionKind::Volume, 20).unwrap();
        file.write_all(&[0u8; 20]).unwrap();
        let section = read_section_header(&mut file, 0).unwrap();
        assert_eq!(section.kind, SectionKind::Volume);
        assert_eq!(section.payload_offset, payload_offset);
        assert_eq!(section.payload_size, 20);
    }
}
