//! LEF category/record grammar: decodes the payload of an `ltree`/
//! `single_files` section into a [`LefTree`].
//!
//! The stream is organized into categories separated by blank lines; each
//! category opens with a type-name line, a version/count line, a types line
//! of 1–3-character column codes, then value lines zipped positionally
//! against the types line.
//!
//! Column-code lengths below count *visible* characters, excluding the
//! terminating NUL some encoders count as part of the code (see DESIGN.md).

use super::record::{FileEntry, FileSource, Permission, SerializedString};
use super::tokenize::{decode_utf16le_or_utf8, split_tab_line};
use super::tree::{LefTree, NodeIndex};
use crate::error::{EwfError, Result};
use log::debug;

/// All fields any category's row might set; populated generically from the
/// types/values zip, then classified into a concrete record afterwards.
#[derive(Debug, Default)]
struct DecodedFields {
    name: Option<String>,
    identifier: Option<String>,
    parent: Option<String>,
    property_type: Option<u32>,
    access_mask: Option<u32>,
    ace_flags: Option<u32>,
    security_descriptor: Option<Vec<u8>>,
    id: Option<u32>,
    size: Option<u64>,
    time: Option<u32>,
    md5_hash: Option<String>,
    sha1_hash: Option<String>,
    serial_number: Option<String>,
    model: Option<String>,
    manufacturer: Option<String>,
    evidence_number: Option<String>,
    location: Option<String>,
    domain: Option<String>,
    ip_address: Option<String>,
    mac_address: Option<String>,
    guid: Option<String>,
    primary_guid: Option<String>,
    static_ip: Option<bool>,
    physical_offset: Option<i64>,
    logical_offset: Option<i64>,
    source_type: Option<u8>,
    drive_type: Option<u8>,
}

fn parse_decimal_u64(column: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|_| EwfError::MalformedRecord {
            reason: format!("column '{}' value '{}' is not a decimal integer", column, value),
        })
}

fn parse_decimal_u32_checked(column: &str, value: &str) -> Result<u32> {
    let as_u64 = parse_decimal_u64(column, value)?;
    u32::try_from(as_u64).map_err(|_| EwfError::ValueOutOfBounds {
        column: column.to_string(),
        value: value.to_string(),
    })
}

fn parse_decimal_u8_checked(column: &str, value: &str) -> Result<u8> {
    let as_u64 = parse_decimal_u64(column, value)?;
    u8::try_from(as_u64).map_err(|_| EwfError::ValueOutOfBounds {
        column: column.to_string(),
        value: value.to_string(),
    })
}

/// Decodes one value line against the types line into [`DecodedFields`].
/// Unknown columns are logged at `debug!` and skipped.
fn decode_record(types: &[&str], values: &[&str]) -> Result<DecodedFields> {
    if types.len() != values.len() {
        return Err(EwfError::MalformedRecord {
            reason: format!(
                "types/values column count mismatch: {} vs {}",
                types.len(),
                values.len()
            ),
        });
    }

    let mut fields = DecodedFields::default();
    for (code, value) in types.iter().zip(values.iter()) {
        if value.is_empty() {
            continue; // empty values are "absent"
        }
        match *code {
            "n" => fields.name = Some(value.to_string()),
            "s" => fields.identifier = Some(value.to_string()),
            "p" => fields.parent = Some(value.to_string()),
            "pr" => fields.property_type = Some(parse_decimal_u32_checked("pr", value)?),
            "id" => fields.id = Some(parse_decimal_u32_checked("id", value)?),
            "ls" => fields.size = Some(parse_decimal_u64("ls", value)?),
            "du" => fields.time = Some(parse_decimal_u32_checked("du", value)?),
            "ha" => fields.md5_hash = Some(value.to_string()),
            "sh" => fields.sha1_hash = Some(value.to_string()),
            "sn" => fields.serial_number = Some(value.to_string()),
            "md" => fields.model = Some(value.to_string()),
            "mf" => fields.manufacturer = Some(value.to_string()),
            "ev" => fields.evidence_number = Some(value.to_string()),
            "lc" => fields.location = Some(value.to_string()),
            "ip" => fields.ip_address = Some(value.to_string()),
            "gu" => fields.guid = Some(value.to_string()),
            "tsz" => fields.size = Some(parse_decimal_u64("tsz", value)?),
            "po" => {
                fields.physical_offset = Some(value.parse::<i64>().map_err(|_| {
                    EwfError::MalformedRecord {
                        reason: format!("column 'po' value '{}' is not an integer", value),
                    }
                })?)
            }
            "lo" => {
                fields.logical_offset = Some(value.parse::<i64>().map_err(|_| {
                    EwfError::MalformedRecord {
                        reason: format!("column 'lo' value '{}' is not an integer", value),
                    }
                })?)
            }
            "ty" => fields.source_type = Some(parse_decimal_u8_checked("ty", value)?),
            "g" => fields.drive_type = Some(parse_decimal_u8_checked("g", value)?),
            "dt" => fields.drive_type = Some(parse_decimal_u8_checked("dt", value)?),
            "nta" => fields.access_mask = Some(parse_decimal_u32_checked("nta", value)?),
            "nti" => fields.ace_flags = Some(parse_decimal_u32_checked("nti", value)?),
            "nts" => fields.security_descriptor = Some(value.as_bytes().to_vec()),
            "pgu" => fields.primary_guid = Some(value.to_string()),
            "lip" => fields.static_ip = Some(value != "0"),
            "dno" => fields.domain = Some(value.to_string()),
            "mac" => fields.mac_address = Some(value.to_string()),
            "be" => {
                if let Some((offset, size)) = value.split_once(',') {
                    fields.physical_offset = offset.parse().ok();
                    fields.size = size.parse().ok();
                }
            }
            other => debug!("unrecognized LEF column code '{}', skipping", other),
        }
    }
    Ok(fields)
}

fn looks_like_permission(fields: &DecodedFields) -> bool {
    fields.access_mask.is_some() || fields.ace_flags.is_some() || fields.property_type.is_some()
}

fn looks_like_source(fields: &DecodedFields) -> bool {
    fields.serial_number.is_some()
        || fields.manufacturer.is_some()
        || fields.evidence_number.is_some()
        || fields.drive_type.is_some()
}

impl DecodedFields {
    fn into_permission(self) -> Permission {
        Permission {
            name: self.name.as_deref().map(SerializedString::from),
            identifier: self.identifier.as_deref().map(SerializedString::from),
            property_type: self.property_type.unwrap_or(0),
            access_mask: self.access_mask.unwrap_or(0),
            ace_flags: self.ace_flags.unwrap_or(0),
            security_descriptor: self.security_descriptor,
        }
    }

    fn into_source(self) -> FileSource {
        FileSource {
            id: self.id.unwrap_or(0),
            source_type: self.source_type.unwrap_or(0),
            drive_type: self.drive_type.unwrap_or(0),
            physical_offset: self.physical_offset.unwrap_or(0),
            logical_offset: self.logical_offset.unwrap_or(0),
            total_size: self.size.unwrap_or(0),
            acquisition_time: self.time.unwrap_or(0),
            name: self.name.as_deref().map(SerializedString::from),
            serial_number: self.serial_number.as_deref().map(SerializedString::from),
            model: self.model.as_deref().map(SerializedString::from),
            manufacturer: self.manufacturer.as_deref().map(SerializedString::from),
            evidence_number: self.evidence_number.as_deref().map(SerializedString::from),
            location: self.location.as_deref().map(SerializedString::from),
            domain: self.domain.as_deref().map(SerializedString::from),
            ip_address: self.ip_address.as_deref().map(SerializedString::from),
            mac_address: self.mac_address.as_deref().map(SerializedString::from),
            md5_hash: self.md5_hash.as_deref().map(SerializedString::from),
            sha1_hash: self.sha1_hash.as_deref().map(SerializedString::from),
            guid: self.guid.as_deref().map(SerializedString::from),
            primary_guid: self.primary_guid.as_deref().map(SerializedString::from),
            static_ip: self.static_ip.unwrap_or(false),
        }
    }

    fn into_file_entry(self) -> FileEntry {
        FileEntry {
            id: self.id.unwrap_or(0),
            name: self.name.as_deref().map(SerializedString::from),
            source_identifier: self.identifier.as_deref().map(SerializedString::from),
            logical_size: self.size.unwrap_or(0),
            physical_size: 0,
            creation_time: self.time.unwrap_or(0),
            modification_time: 0,
            access_time: 0,
            entry_modification_time: 0,
            md5_hash: self.md5_hash.as_deref().map(SerializedString::from),
            is_directory: self.size.is_none(),
        }
    }
}

/// One parsed category block: its header keyword and the types/value rows.
struct CategoryBlock<'a> {
    header: &'a str,
    rows: Vec<Vec<&'a str>>,
}

fn split_categories<'a>(lines: &[&'a str]) -> Vec<CategoryBlock<'a>> {
    let mut categories = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let header = lines[i].trim();
        if header.is_empty() {
            i += 1;
            continue;
        }
        // Skip the version/count line, if present and distinct from the
        // types line (types lines always contain a tab).
        let mut cursor = i + 1;
        if cursor < lines.len() && !lines[cursor].contains('\t') {
            cursor += 1;
        }
        if cursor >= lines.len() {
            break;
        }
        let types_line = lines[cursor];
        cursor += 1;

        let mut rows = Vec::new();
        while cursor < lines.len() && lines[cursor].contains('\t') {
            rows.push(split_tab_line(lines[cursor]));
            cursor += 1;
        }
        categories.push(CategoryBlock {
            header,
            rows: std::iter::once(split_tab_line(types_line))
                .chain(rows)
                .collect(),
        });
        i = cursor;
    }
    categories
}

/// Parses a whole `ltree`/`single_files` payload into a [`LefTree`] rooted
/// under a fresh `single_files` node.
///
/// Each record's `p` ("parent pointer") column, when present, is looked up
/// against the `s`/`id` identifier of a record already attached earlier in
/// the stream, by keeping a running identifier→node index as categories are
/// walked; records with no resolvable parent attach directly under the
/// root, which also covers the common case of a flat, unnested category.
pub fn parse_ltree(raw: &[u8]) -> Result<LefTree> {
    let text = decode_utf16le_or_utf8(raw);
    let lines: Vec<&str> = text
        .split(['\n', '\r'])
        .filter(|l| !l.trim().is_empty())
        .collect();

    let mut tree = LefTree::new();
    let mut parents: std::collections::HashMap<String, NodeIndex> = std::collections::HashMap::new();
    for block in split_categories(&lines) {
        if !is_known_category(block.header) {
            return Err(EwfError::UnexpectedCategory {
                header: block.header.to_string(),
            });
        }
        let types = &block.rows[0];
        for values in &block.rows[1..] {
            let fields = decode_record(types, values)?;
            let parent = fields
                .parent
                .as_ref()
                .and_then(|key| parents.get(key))
                .copied()
                .unwrap_or(tree.root);
            let key = fields
                .identifier
                .clone()
                .or_else(|| fields.id.map(|id| id.to_string()));
            let node = attach_record(&mut tree, parent, block.header, fields);
            if let Some(key) = key {
                parents.insert(key, node);
            }
        }
    }
    Ok(tree)
}

const KNOWN_CATEGORIES: &[&str] = &[
    "entry", "entries", "file_entry", "source", "srce", "perm", "permission",
];

fn is_known_category(header: &str) -> bool {
    let header = header.to_ascii_lowercase();
    KNOWN_CATEGORIES.iter().any(|known| header == *known)
}

fn attach_record(
    tree: &mut LefTree,
    parent: NodeIndex,
    header: &str,
    fields: DecodedFields,
) -> NodeIndex {
    let header = header.to_ascii_lowercase();
    if header.starts_with("perm") || (header.starts_with("entr") && looks_like_permission(&fields))
    {
        tree.push_permission(parent, fields.into_permission())
    } else if header.starts_with("src") || header.starts_with("source") || looks_like_source(&fields)
    {
        tree.push_source(parent, fields.into_source())
    } else {
        tree.push_file_entry(parent, fields.into_file_entry())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16le(text: &str) -> Vec<u8> {
        let mut bytes: Vec<u8> = vec![0xFF, 0xFE];
        bytes.extend(text.encode_utf16().flat_map(|c| c.to_le_bytes()));
        bytes
    }

    #[test]
    fn parses_scenario_5_permission_record() {
        let payload = utf16le(
            "entry\n1\np\tn\ts\t\tpr\tnta\tnti\n\tSystem\tS-1-5-18\t\t2\t2032127\t16\n",
        );
        let tree = parse_ltree(&payload).unwrap();
        assert_eq!(tree.permissions.len(), 1);
        let permission = &tree.permissions[0];
        assert_eq!(permission.name.as_ref().unwrap().data, "System");
        assert_eq!(permission.identifier.as_ref().unwrap().data, "S-1-5-18");
        assert_eq!(permission.property_type, 2);
        assert_eq!(permission.access_mask, 2032127);
        assert_eq!(permission.ace_flags, 16);
    }

    #[test]
    fn rejects_mismatched_column_counts() {
        let err = decode_record(&["n", "s"], &["only-one"]).unwrap_err();
        assert!(matches!(err, EwfError::MalformedRecord { .. }));
    }

    #[test]
    fn empty_values_are_absent() {
        let fields = decode_record(&["n", "s"], &["Alice", ""]).unwrap();
        assert_eq!(fields.name.as_deref(), Some("Alice"));
        assert_eq!(fields.identifier, None);
    }

    #[test]
    fn source_category_builds_file_source() {
        let payload = utf16le(
            "source\n1\nn\tsn\tmf\tev\n\
             Drive C\tABC123\tAcme\tEV-1\n",
        );
        let tree = parse_ltree(&payload).unwrap();
        assert_eq!(tree.sources.len(), 1);
        assert_eq!(tree.sources[0].name.as_ref().unwrap().data, "Drive C");
        assert_eq!(
            tree.sources[0].serial_number.as_ref().unwrap().data,
            "ABC123"
        );
    }

    #[test]
    fn value_out_of_bounds_is_reported() {
        let err = decode_record(&["pr"], &["99999999999"]).unwrap_err();
        assert!(matches!(err, EwfError::ValueOutOfBounds { .. }));
    }

    #[test]
    fn source_type_out_of_bounds_is_reported_instead_of_truncated() {
        let err = decode_record(&["ty"], &["256"]).unwrap_err();
        assert!(matches!(err, EwfError::ValueOutOfBounds { .. }));
        let err = decode_record(&["g"], &["300"]).unwrap_err();
        assert!(matches!(err, EwfError::ValueOutOfBounds { .. }));
    }

    #[test]
    fn unknown_category_header_is_rejected() {
        let payload = utf16le("widget\n1\nn\nfoo\n");
        let err = parse_ltree(&payload).unwrap_err();
        assert!(matches!(err, EwfError::UnexpectedCategory { .. }));
    }
}
