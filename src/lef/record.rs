//! Typed LEF records: `source` (file_source), `permission`, and `entry`
//! (file_entry), plus the shared serialized-string primitive.

/// `{ data: UTF-8 bytes, data_size }`, filled by decoding UTF-16LE input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerializedString {
    pub data: String,
}

impl SerializedString {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<&str> for SerializedString {
    fn from(value: &str) -> Self {
        SerializedString {
            data: value.to_string(),
        }
    }
}

/// A `file_source`/`source` record: one acquired device or image that
/// contributed files to this logical-evidence set.
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    pub id: u32,
    pub source_type: u8,
    pub drive_type: u8,
    pub physical_offset: i64,
    pub logical_offset: i64,
    pub total_size: u64,
    pub acquisition_time: u32,
    pub name: Option<SerializedString>,
    pub serial_number: Option<SerializedString>,
    pub model: Option<SerializedString>,
    pub manufacturer: Option<SerializedString>,
    pub evidence_number: Option<SerializedString>,
    pub location: Option<SerializedString>,
    pub domain: Option<SerializedString>,
    pub ip_address: Option<SerializedString>,
    pub mac_address: Option<SerializedString>,
    pub md5_hash: Option<SerializedString>,
    pub sha1_hash: Option<SerializedString>,
    pub guid: Option<SerializedString>,
    pub primary_guid: Option<SerializedString>,
    pub static_ip: bool,
}

/// A `permission`/`perm` record: one Windows NT ACE or POSIX permission
/// entry attached to a file or source.
#[derive(Debug, Clone, Default)]
pub struct Permission {
    pub name: Option<SerializedString>,
    /// Windows NT Security Identifier (SID), or a POSIX uid/gid rendered as
    /// a decimal string.
    pub identifier: Option<SerializedString>,
    pub property_type: u32,
    pub access_mask: u32,
    pub ace_flags: u32,
    /// The `nts` (security descriptor) column: recognized but left as
    /// opaque bytes rather than decoded into a typed ACL.
    pub security_descriptor: Option<Vec<u8>>,
}

/// An `entry`/`file_entry` record: one file or directory in the logical
/// tree, with its owning source and timestamps.
#[derive(Debug, Clone, Default)]
pub struct FileEntry {
    pub id: u32,
    pub name: Option<SerializedString>,
    pub source_identifier: Option<SerializedString>,
    pub logical_size: u64,
    pub physical_size: u64,
    pub creation_time: u32,
    pub modification_time: u32,
    pub access_time: u32,
    pub entry_modification_time: u32,
    pub md5_hash: Option<SerializedString>,
    pub is_directory: bool,
}
