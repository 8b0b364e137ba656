//! Segment-file directory: filename↔index table for evidence and delta
//! sets, the extension generator/parser, and open/create/close of the
//! multi-file set.
//!
//! The extension algorithm: the first character is the kind's base letter;
//! segments 1..=99 get a decimal suffix; segments 100..14971 get a base-26
//! alphabetic counter that carries into the first character.

use crate::error::{EwfError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub const EVIDENCE_MAGIC_E01: [u8; 8] = [0x45, 0x56, 0x46, 0x09, 0x0D, 0x0A, 0xFF, 0x00];
pub const LOGICAL_MAGIC_L01: [u8; 8] = [0x4C, 0x56, 0x46, 0x09, 0x0D, 0x0A, 0xFF, 0x00];
pub const DELTA_MAGIC: [u8; 8] = [0x64, 0x76, 0x66, 0x09, 0x0D, 0x0A, 0xFF, 0x00];
pub const SMART_MAGIC_S01: [u8; 8] = [0x53, 0x45, 0x56, 0x46, 0x09, 0x0D, 0x0A, 0x00];

/// The file header at the very start of every segment file (13 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentFileHeader {
    pub kind: SegmentKind,
    pub segment_number: u16,
}

/// Which physical role a segment file plays in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Evidence,
    Logical,
    Delta,
    Smart,
}

impl SegmentFileHeader {
    /// Reads and validates the 13-byte file header from the start of `file`.
    pub fn read(file: &mut File) -> Result<Self> {
        file.seek(SeekFrom::Start(0))
            .map_err(|e| EwfError::io("seeking to segment file header", e))?;
        let mut header = [0u8; 13];
        file.read_exact(&mut header)
            .map_err(|e| EwfError::io("reading segment file header", e))?;

        let magic: [u8; 8] = header[0..8].try_into().unwrap();
        let kind = if magic == EVIDENCE_MAGIC_E01 {
            SegmentKind::Evidence
        } else if magic == LOGICAL_MAGIC_L01 {
            SegmentKind::Logical
        } else if magic == DELTA_MAGIC {
            SegmentKind::Delta
        } else if magic == SMART_MAGIC_S01 {
            SegmentKind::Smart
        } else {
            return Err(EwfError::CorruptSegment {
                reason: "unrecognized segment file magic".to_string(),
            });
        };

        let fields_start = header[8];
        let segment_number = u16::from_le_bytes(header[9..11].try_into().unwrap());
        let fields_end = &header[11..13];

        if fields_start != 1 || fields_end != [0u8, 0u8] {
            return Err(EwfError::CorruptSegment {
                reason: "invalid reserved fields in segment file header".to_string(),
            });
        }

        Ok(SegmentFileHeader {
            kind,
            segment_number,
        })
    }

    /// Serializes the 13-byte file header for writing.
    pub fn to_bytes(self) -> [u8; 13] {
        let mut out = [0u8; 13];
        let magic = match self.kind {
            SegmentKind::Evidence => EVIDENCE_MAGIC_E01,
            SegmentKind::Logical => LOGICAL_MAGIC_L01,
            SegmentKind::Delta => DELTA_MAGIC,
            SegmentKind::Smart => SMART_MAGIC_S01,
        };
        out[0..8].copy_from_slice(&magic);
        out[8] = 1;
        out[9..11].copy_from_slice(&self.segment_number.to_le_bytes());
        out
    }
}

/// Highest segment number representable before the base-26 counter would
/// have to carry a second time out of the first character's alphabetic
/// range (26 kinds * 26 * 26, matching the source's safety check).
pub const MAX_SEGMENT_NUMBER: u32 = 14971;

/// Produces the 3-character extension for `segment_number` under `kind`,
/// following `libewf_segment_file_create_extension`'s algorithm.
pub fn make_extension(segment_number: u32, kind: SegmentKind) -> Result<String> {
    if segment_number == 0 {
        return Err(EwfError::InvalidArgument {
            message: "segment number must start at 1".to_string(),
        });
    }
    if segment_number > MAX_SEGMENT_NUMBER {
        return Err(EwfError::NotSupported {
            reason: format!("segment number {} exceeds the maximum", segment_number),
        });
    }

    let (first_base, carry_base): (u8, u8) = match kind {
        SegmentKind::Evidence => (b'E', b'A'),
        SegmentKind::Logical => (b'L', b'A'),
        SegmentKind::Delta => (b'd', b'a'),
        SegmentKind::Smart => (b's', b'a'),
    };

    let mut extension = [0u8; 3];
    let mut first_char = first_base;

    if segment_number <= 99 {
        extension[2] = b'0' + (segment_number % 10) as u8;
        extension[1] = b'0' + (segment_number / 10) as u8;
    } else {
        let mut n = segment_number - 100;
        extension[2] = carry_base + (n % 26) as u8;
        n /= 26;
        extension[1] = carry_base + (n % 26) as u8;
        n /= 26;
        if n >= 26 {
            return Err(EwfError::NotSupported {
                reason: "unable to support for more segment files".to_string(),
            });
        }
        first_char = first_base + n as u8;
    }

    if first_char > b'z' || (first_char > b'Z' && first_char < b'a') {
        return Err(EwfError::NotSupported {
            reason: "unable to support for more segment files".to_string(),
        });
    }
    extension[0] = first_char;

    Ok(String::from_utf8(extension.to_vec()).unwrap())
}

/// Parses a segment file's extension (e.g. `"E01"`, `"e01"`, `"d01"`) back
/// into a segment number and its [`SegmentKind`].
pub fn parse_extension(extension: &str) -> Result<(u32, SegmentKind)> {
    let bytes = extension.as_bytes();
    if bytes.len() != 3 {
        return Err(EwfError::InvalidArgument {
            message: format!("extension '{}' must be 3 characters", extension),
        });
    }
    let (kind, first_base, carry_base) = match bytes[0] {
        b'E' => (SegmentKind::Evidence, b'E', b'A'),
        b'L' => (SegmentKind::Logical, b'L', b'A'),
        b'd' => (SegmentKind::Delta, b'd', b'a'),
        b's' => (SegmentKind::Smart, b's', b'a'),
        _ => {
            return Err(EwfError::InvalidArgument {
                message: format!("unrecognized extension kind '{}'", extension),
            })
        }
    };

    if bytes[1].is_ascii_digit() && bytes[2].is_ascii_digit() {
        let tens = (bytes[1] - b'0') as u32;
        let ones = (bytes[2] - b'0') as u32;
        let number = tens * 10 + ones;
        if number == 0 {
            return Err(EwfError::InvalidArgument {
                message: "segment number 0 is invalid".to_string(),
            });
        }
        return Ok((number, kind));
    }

    let carry0 = (bytes[0].wrapping_sub(first_base)) as u32;
    let carry1 = (bytes[1].wrapping_sub(carry_base)) as u32;
    let carry2 = (bytes[2].wrapping_sub(carry_base)) as u32;
    let number = 100 + carry0 * 26 * 26 + carry1 * 26 + carry2;
    Ok((number, kind))
}

/// An opened segment file with its parsed header and path, kept around so
/// the chunk store can reopen/seek it on demand.
pub struct OpenSegment {
    pub path: PathBuf,
    pub header: SegmentFileHeader,
    pub file: File,
}

/// Directory of evidence/logical segments and delta segments belonging to
/// one multi-file image, keyed by segment number.
#[derive(Default)]
pub struct SegmentDirectory {
    pub evidence: Vec<OpenSegment>,
    pub delta: Vec<OpenSegment>,
}

impl SegmentDirectory {
    /// Opens every path in `paths` (read-only unless `writable` is set for a
    /// logical/delta set), classifies each by its file header, and returns
    /// the populated directory sorted by segment number.
    pub fn open(paths: &[PathBuf], writable: bool) -> Result<Self> {
        let mut directory = SegmentDirectory::default();
        for path in paths {
            let mut options = OpenOptions::new();
            options.read(true);
            if writable {
                options.write(true);
            }
            let mut file = options
                .open(path)
                .map_err(|e| EwfError::io(format!("opening '{}'", path.display()), e))?;
            let header = SegmentFileHeader::read(&mut file)?;
            let opened = OpenSegment {
                path: path.clone(),
                header,
                file,
            };
            match header.kind {
                SegmentKind::Delta => directory.delta.push(opened),
                _ => directory.evidence.push(opened),
            }
        }
        directory
            .evidence
            .sort_by_key(|s| s.header.segment_number);
        directory.delta.sort_by_key(|s| s.header.segment_number);
        Ok(directory)
    }

    /// Looks up the evidence/logical segment file with the given number.
    pub fn evidence_file(&mut self, segment_number: u16) -> Result<&mut File> {
        self.evidence
            .iter_mut()
            .find(|s| s.header.segment_number == segment_number)
            .map(|s| &mut s.file)
            .ok_or_else(|| EwfError::NotFound {
                what: format!("segment {}", segment_number),
            })
    }

    /// Looks up the delta segment file with the given number.
    pub fn delta_file(&mut self, segment_number: u16) -> Result<&mut File> {
        self.delta
            .iter_mut()
            .find(|s| s.header.segment_number == segment_number)
            .map(|s| &mut s.file)
            .ok_or_else(|| EwfError::NotFound {
                what: format!("delta segment {}", segment_number),
            })
    }

    pub fn last_evidence_segment_number(&self) -> u16 {
        self.evidence
            .last()
            .map(|s| s.header.segment_number)
            .unwrap_or(0)
    }

    pub fn last_delta_segment_number(&self) -> u16 {
        self.delta
            .last()
            .map(|s| s.header.segment_number)
            .unwrap_or(0)
    }
}

/// Finds every segment file belonging to the same multi-file image as
/// `path`, by globbing the parent directory for the same base name with a
/// wild-carded two-character suffix (e.g. `image.E01` → `image.E??`).
pub fn find_segment_paths(path: &Path) -> Result<Vec<PathBuf>> {
    let path = path.canonicalize().map_err(|e| {
        EwfError::io(format!("resolving path '{}'", path.display()), e)
    })?;
    let filename = path
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| EwfError::InvalidArgument {
            message: "invalid file name".to_string(),
        })?;

    if filename.len() < 2 {
        return Err(EwfError::InvalidArgument {
            message: "file name too short to contain a segment extension".to_string(),
        });
    }

    let base = &filename[..filename.len() - 2];
    let parent = path.parent().ok_or_else(|| EwfError::InvalidArgument {
        message: "path has no parent directory".to_string(),
    })?;

    let mut pattern = PathBuf::from(parent);
    pattern.push(format!("{}??", base));
    let pattern_str = pattern.to_str().ok_or_else(|| EwfError::InvalidArgument {
        message: "non-UTF8 path".to_string(),
    })?;

    let mut found: Vec<PathBuf> = glob::glob(pattern_str)
        .map_err(|e| EwfError::InvalidArgument {
            message: format!("invalid glob pattern: {}", e),
        })?
        .filter_map(std::result::Result::ok)
        .collect();
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_decimal_range() {
        assert_eq!(make_extension(1, SegmentKind::Evidence).unwrap(), "E01");
        assert_eq!(make_extension(9, SegmentKind::Evidence).unwrap(), "E09");
        assert_eq!(make_extension(99, SegmentKind::Evidence).unwrap(), "E99");
    }

    #[test]
    fn extension_alphabetic_carry() {
        // first alphabetic segment after the 99 decimal ones.
        assert_eq!(make_extension(100, SegmentKind::Evidence).unwrap(), "EAA");
        assert_eq!(make_extension(101, SegmentKind::Evidence).unwrap(), "EAB");
        assert_eq!(make_extension(125, SegmentKind::Evidence).unwrap(), "EAZ");
        assert_eq!(make_extension(126, SegmentKind::Evidence).unwrap(), "EBA");
    }

    #[test]
    fn extension_delta_uses_lowercase() {
        assert_eq!(make_extension(1, SegmentKind::Delta).unwrap(), "d01");
    }

    #[test]
    fn extension_zero_is_invalid() {
        assert!(make_extension(0, SegmentKind::Evidence).is_err());
    }

    #[test]
    fn extension_round_trips_through_parse() {
        for n in [1u32, 9, 50, 99, 100, 101, 125, 126, 200, 700] {
            let ext = make_extension(n, SegmentKind::Evidence).unwrap();
            let (parsed, kind) = parse_extension(&ext).unwrap();
            assert_eq!(parsed, n, "extension {} parsed back as {}", ext, parsed);
            assert_eq!(kind, SegmentKind::Evidence);
        }
    }

    #[test]
    fn segment_file_header_round_trips() {
        let header = SegmentFileHeader {
            kind: SegmentKind::Evidence,
            segment_number: 3,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..8], &EVIDENCE_MAGIC_E01);
        assert_eq!(bytes[8], 1);
        assert_eq!(u16::from_le_bytes(bytes[9..11].try_into().unwrap()), 3);
        assert_eq!(&bytes[11..13], &[0, 0]);
    }
}
