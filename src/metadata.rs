//! Metadata sections: `volume`/`disk`, `header`/`header2`/`xheader`,
//! `hash`/`xhash`, `error2`, `session`, `digest`. Compressed-text payloads
//! are decoded to UTF-8 key/value maps; binary sections are decoded into
//! typed structs.

use crate::codec::inflate;
use crate::error::{EwfError, Result};
use serde::Serialize;
use std::collections::HashMap;

/// Geometry and layout information from the `volume`/`disk` section.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VolumeSection {
    pub media_type: u8,
    pub chunk_count: u32,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub total_sector_count: u64,
    pub compression_level: u8,
    pub media_flags: u8,
    pub error_granularity: u32,
    pub guid: [u8; 16],
}

impl VolumeSection {
    /// Serializes the fields this core cares about into a 94-byte `volume`
    /// payload (the common prefix of both the EnCase1 128-byte and the
    /// EnCase2+ 1052-byte layouts). Callers writing a richer dialect pad
    /// the remainder with zeros before writing the section.
    pub fn to_bytes(&self) -> [u8; 94] {
        let mut payload = [0u8; 94];
        payload[0] = self.media_type;
        payload[4..8].copy_from_slice(&self.chunk_count.to_le_bytes());
        payload[8..12].copy_from_slice(&self.sectors_per_chunk.to_le_bytes());
        payload[12..16].copy_from_slice(&self.bytes_per_sector.to_le_bytes());
        payload[16..20].copy_from_slice(&(self.total_sector_count as u32).to_le_bytes());
        payload[24] = self.media_flags;
        payload[28..32].copy_from_slice(&self.error_granularity.to_le_bytes());
        payload[45] = self.compression_level;
        payload[78..94].copy_from_slice(&self.guid);
        payload
    }

    /// Size in bytes of one chunk of the payload.
    pub fn chunk_size(&self) -> u64 {
        self.sectors_per_chunk as u64 * self.bytes_per_sector as u64
    }

    /// Total size of the acquired media.
    pub fn media_size(&self) -> u64 {
        self.total_sector_count * self.bytes_per_sector as u64
    }

    /// Decodes the legacy EnCase1 `volume` layout (128 bytes) or the
    /// EnCase2+ `disk`/`volume` layout (1052 bytes); both share the same
    /// leading fields this core cares about.
    pub fn parse(payload: &[u8]) -> Result<VolumeSection> {
        if payload.len() < 94 {
            return Err(EwfError::CorruptSegment {
                reason: format!("volume/disk section too small ({} bytes)", payload.len()),
            });
        }
        let u32_at = |o: usize| u32::from_le_bytes(payload[o..o + 4].try_into().unwrap());

        let media_type = payload[0];
        let chunk_count = u32_at(4);
        let sectors_per_chunk = u32_at(8);
        let bytes_per_sector = u32_at(12);
        let total_sector_count = u32_at(16) as u64;
        let media_flags = payload[24];
        let error_granularity = u32_at(28);
        let compression_level = payload[45.min(payload.len() - 1)];
        let mut guid = [0u8; 16];
        if payload.len() >= 94 {
            guid.copy_from_slice(&payload[78..94]);
        }

        Ok(VolumeSection {
            media_type,
            chunk_count,
            sectors_per_chunk,
            bytes_per_sector,
            total_sector_count,
            compression_level,
            media_flags,
            error_granularity,
            guid,
        })
    }
}

/// Decodes a `header`/`header2`/`xheader` payload into the canonical
/// identifier→value map. `header` is compressed ASCII, `header2` compressed
/// UTF-16LE, `xheader` compressed flattened key/value text; all three share
/// this module's decoder.
pub fn parse_header_section(compressed_payload: &[u8]) -> Result<HashMap<String, String>> {
    let data = inflate(compressed_payload)?;
    Ok(parse_metadata_text(&data))
}

fn decode_text(raw: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(raw) {
        return text.to_string();
    }
    if raw.len() % 2 == 0 {
        let utf16: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        if let Ok(text) = String::from_utf16(&utf16) {
            return text;
        }
    }
    String::new()
}

fn table_to_map(keys: &str, values: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (k, v) in keys.split('\t').zip(values.split('\t')) {
        let k = k.trim_matches('\0').to_string();
        let v = v.trim_matches('\0').to_string();
        if !k.is_empty() {
            map.insert(k, v);
        }
    }
    map
}

/// Robust parser tolerating an optional BOM, blank lines, and the classic
/// one-entry-per-line fallback used by older images.
pub fn parse_metadata_text(raw: &[u8]) -> HashMap<String, String> {
    let text = decode_text(raw);
    let mut lines: Vec<&str> = text
        .split(['\n', '\r'])
        .filter(|l| !l.trim().is_empty())
        .collect();

    if let Some(first) = lines.first_mut() {
        *first = first.trim_start_matches('\u{FEFF}');
    }

    for i in 0..lines.len().saturating_sub(1) {
        if lines[i].contains('\t') && lines[i + 1].contains('\t') {
            return table_to_map(lines[i], lines[i + 1]);
        }
    }

    let mut map = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once('\t') {
            let k = k.trim_matches('\0').to_string();
            if !k.is_empty() {
                map.insert(k, v.trim_matches('\0').to_string());
            }
        }
    }
    map
}

/// Serializes `metadata` into the classic `header`/`header2` ASCII table
/// text (a keys row, a single values row) for writing, then compresses it
/// with DEFLATE, mirroring `parse_header_section`'s decode. `utf16` selects
/// the `header2` (UTF-16LE) encoding over `header`'s plain ASCII.
pub fn serialize_header_section(metadata: &HashMap<String, String>, utf16: bool) -> Result<Vec<u8>> {
    let mut keys: Vec<&str> = CANONICAL_HEADER_KEY_ORDER
        .iter()
        .copied()
        .filter(|k| metadata.contains_key(*k))
        .collect();
    for k in metadata.keys() {
        if !keys.contains(&k.as_str()) {
            keys.push(k.as_str());
        }
    }
    let values: Vec<&str> = keys
        .iter()
        .map(|k| metadata.get(*k).map(String::as_str).unwrap_or(""))
        .collect();
    let text = format!("{}\n{}\n", keys.join("\t"), values.join("\t"));

    let raw = if utf16 {
        let mut bytes: Vec<u8> = vec![0xFF, 0xFE];
        bytes.extend(text.encode_utf16().flat_map(|c| c.to_le_bytes()));
        bytes
    } else {
        text.into_bytes()
    };
    crate::codec::deflate(&raw)
}

/// Merges a newly decoded header variant into an existing map, letting later
/// (richer) variants — `header2` then `xheader` — override duplicate keys,
/// matching the source's "UTF-16 beats ASCII" precedence.
pub fn merge_header_metadata(into: &mut HashMap<String, String>, other: HashMap<String, String>) {
    into.extend(other);
}

/// Canonical display order for the well-known acquisition metadata keys.
pub const CANONICAL_HEADER_KEY_ORDER: &[&str] = &[
    "c", "cn", "n", "en", "a", "e", "ex", "t", "nt", "av", "ov", "m", "u", "p", "r", "dc", "md",
    "sn",
];

pub fn pretty_header_key(id: &str) -> &str {
    match id {
        "c" | "cn" => "Case Number",
        "n" | "en" => "Evidence Number",
        "a" => "Description",
        "e" | "ex" => "Examiner",
        "t" | "nt" => "Notes",
        "av" => "Acquiry Software Version",
        "ov" => "Acquiry Operating System",
        "m" => "Acquisition Date",
        "u" => "System Date",
        "p" => "Password Hash",
        "r" => "Compression Level",
        "dc" => "Device",
        "md" => "Model",
        "sn" => "Serial Number",
        _ => id,
    }
}

/// `hash`/`xhash`/`digest`: integrity fields the core records but does not
/// verify against the payload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HashSection {
    pub md5: Option<[u8; 16]>,
    pub sha1: Option<[u8; 20]>,
}

impl HashSection {
    /// `hash` carries only an MD5 (16 bytes); `xhash`/`digest` additionally
    /// carry a SHA-1 (20 bytes) immediately following it.
    pub fn parse(payload: &[u8]) -> Result<HashSection> {
        if payload.len() < 16 {
            return Err(EwfError::CorruptSegment {
                reason: format!("hash section too small ({} bytes)", payload.len()),
            });
        }
        let mut md5 = [0u8; 16];
        md5.copy_from_slice(&payload[0..16]);
        let sha1 = if payload.len() >= 36 {
            let mut sha1 = [0u8; 20];
            sha1.copy_from_slice(&payload[16..36]);
            Some(sha1)
        } else {
            None
        };
        Ok(HashSection {
            md5: Some(md5),
            sha1,
        })
    }

    /// Serializes to a `hash` (MD5-only) or `xhash`/`digest` (MD5+SHA-1)
    /// payload, matching the layout [`Self::parse`] decodes.
    pub fn to_bytes(&self, with_sha1: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(36);
        out.extend_from_slice(&self.md5.unwrap_or([0u8; 16]));
        if with_sha1 {
            out.extend_from_slice(&self.sha1.unwrap_or([0u8; 20]));
        }
        out
    }
}

/// One acquisition-error range recorded by `error2`: sectors
/// `[first_sector, first_sector + sector_count)` that failed to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorRange {
    pub first_sector: u32,
    pub sector_count: u32,
}

/// Parses an `error2` payload: a 4-byte count, 4-byte reserved/Adler, then
/// `count` entries of `(first_sector: u32, sector_count: u32)`.
pub fn parse_error2_section(payload: &[u8]) -> Result<Vec<ErrorRange>> {
    if payload.len() < 8 {
        return Ok(Vec::new());
    }
    let count = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let mut ranges = Vec::with_capacity(count);
    let mut offset = 8;
    for _ in 0..count {
        if offset + 8 > payload.len() {
            break;
        }
        let first_sector = u32::from_le_bytes(payload[offset..offset + 4].try_into().unwrap());
        let sector_count =
            u32::from_le_bytes(payload[offset + 4..offset + 8].try_into().unwrap());
        ranges.push(ErrorRange {
            first_sector,
            sector_count,
        });
        offset += 8;
    }
    Ok(ranges)
}

/// One optical-media session entry recorded by `session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionEntry {
    pub first_sector: u32,
    pub sector_count: u32,
    pub flags: u32,
}

/// Parses a `session` payload, same header shape as `error2` but with an
/// extra `flags` field per entry.
pub fn parse_session_section(payload: &[u8]) -> Result<Vec<SessionEntry>> {
    if payload.len() < 8 {
        return Ok(Vec::new());
    }
    let count = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let mut entries = Vec::with_capacity(count);
    let mut offset = 8;
    for _ in 0..count {
        if offset + 12 > payload.len() {
            break;
        }
        let first_sector = u32::from_le_bytes(payload[offset..offset + 4].try_into().unwrap());
        let sector_count =
            u32::from_le_bytes(payload[offset + 4..offset + 8].try_into().unwrap());
        let flags = u32::from_le_bytes(payload[offset + 8..offset + 12].try_into().unwrap());
        entries.push(SessionEntry {
            first_sector,
            sector_count,
            flags,
        });
        offset += 12;
    }
    Ok(entries)
}
