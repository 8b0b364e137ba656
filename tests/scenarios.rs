//! End-to-end coverage for the six acquisition/read scenarios this crate
//! is built against: a single-sector raw image, a multi-chunk image with a
//! corrupted chunk, a segment-spanning read, a delta overlay, a logical
//! evidence permission record, and a corrupt section descriptor.

use ewf_core::error::EwfError;
use ewf_core::handle::{CreateOptions, EwfFormat, Handle};
use ewf_core::lef::LogicalTree;
use ewf_core::metadata::VolumeSection;
use ewf_core::section::{self, SectionKind};
use ewf_core::segment;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use tempfile::tempdir;

fn volume(total_sectors: u64, sectors_per_chunk: u32, bytes_per_sector: u32) -> VolumeSection {
    VolumeSection {
        media_type: 0,
        chunk_count: 0,
        sectors_per_chunk,
        bytes_per_sector,
        total_sector_count: total_sectors,
        compression_level: 1,
        media_flags: 0,
        error_granularity: 0,
        guid: [0u8; 16],
    }
}

fn options(total_sectors: u64, sectors_per_chunk: u32, bytes_per_sector: u32) -> CreateOptions {
    CreateOptions {
        format: EwfFormat::EnCase6,
        volume: volume(total_sectors, sectors_per_chunk, bytes_per_sector),
        header_metadata: Default::default(),
        max_segment_size: 1024 * 1024 * 1024,
        compress: true,
    }
}

/// Scenario 1: a one-sector, one-chunk image round-trips through
/// create/write/close/open/read.
#[test]
fn single_sector_single_chunk_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("single.E01");

    let handle = Handle::create(&path, options(1, 1, 512)).unwrap();
    let plain = vec![0x5Au8; 512];
    assert_eq!(handle.write_at(0, &plain).unwrap(), 512);
    handle.close().unwrap();

    let reopened = Handle::open(&[path]).unwrap();
    assert_eq!(reopened.media_size(), 512);
    let mut buf = vec![0u8; 512];
    assert_eq!(reopened.read_at(0, &mut buf).unwrap(), 512);
    assert_eq!(buf, plain);
}

/// Scenario 2: a two-chunk image where the second chunk's on-disk bytes are
/// corrupted after acquisition — the first chunk still reads cleanly, the
/// second reports a checksum or decompression failure, never silently wrong
/// bytes.
#[test]
fn corrupted_second_chunk_is_reported_without_affecting_the_first() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("two_chunks.E01");

    let mut no_compress = options(2, 1, 512);
    no_compress.compress = false;
    let handle = Handle::create(&path, no_compress).unwrap();
    let chunk0 = vec![0x11u8; 512];
    let chunk1 = vec![0x22u8; 512];
    handle.write_at(0, &chunk0).unwrap();
    handle.write_at(512, &chunk1).unwrap();
    handle.close().unwrap();

    let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    let sections = section::iterate_sections(&mut file, 13).unwrap();
    let sectors = sections
        .iter()
        .find(|s| s.kind == SectionKind::Sectors)
        .unwrap();
    // Each chunk is stored raw (512 bytes) plus a 4-byte CRC trailer; land
    // the flip well inside the second chunk's plaintext, away from either
    // chunk's CRC trailer.
    let corrupt_at = sectors.payload_offset + 516 + 10;
    file.seek(SeekFrom::Start(corrupt_at)).unwrap();
    let mut original = [0u8; 1];
    file.read_exact(&mut original).unwrap();
    file.seek(SeekFrom::Start(corrupt_at)).unwrap();
    file.write_all(&[original[0] ^ 0xFF]).unwrap();
    drop(file);

    let reopened = Handle::open(&[path]).unwrap();
    let mut first = vec![0u8; 512];
    assert_eq!(reopened.read_at(0, &mut first).unwrap(), 512);
    assert_eq!(first, chunk0);

    let mut second = vec![0u8; 512];
    let err = reopened.read_at(512, &mut second).unwrap_err();
    assert!(matches!(err, EwfError::Checksum { .. }) || matches!(err, EwfError::Decompression { .. }));
}

/// Scenario 3: forcing a segment rollover mid-acquisition still produces a
/// single coherent media image, read back transparently across the
/// `.E01`/`.E02` boundary.
#[test]
fn read_spans_two_segment_files() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("spanning.E01");

    let mut create_options = options(2, 1, 512);
    create_options.max_segment_size = 64;
    let handle = Handle::create(&path, create_options).unwrap();

    let chunk0 = vec![0xAAu8; 512];
    let chunk1 = vec![0xBBu8; 512];
    handle.write_at(0, &chunk0).unwrap();
    handle.write_at(512, &chunk1).unwrap();
    handle.close().unwrap();

    let paths = segment::find_segment_paths(&path).unwrap();
    assert!(
        paths.len() > 1,
        "such a small max_segment_size should force at least one rollover, found {} segment(s)",
        paths.len()
    );

    let reopened = Handle::open(&paths).unwrap();
    assert_eq!(reopened.media_size(), 1024);
    let mut buf = vec![0u8; 1024];
    assert_eq!(reopened.read_at(0, &mut buf).unwrap(), 1024);
    assert_eq!(&buf[0..512], &chunk0[..]);
    assert_eq!(&buf[512..1024], &chunk1[..]);
}

/// Scenario 4: opening an acquired image for delta (overwrite) writes
/// redirects the touched chunk into a new `.d01` segment, leaving the
/// original evidence file untouched.
#[test]
fn delta_write_redirects_into_a_new_delta_segment() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("delta.E01");

    let handle = Handle::create(&path, options(1, 1, 512)).unwrap();
    let original = vec![0x00u8; 512];
    handle.write_at(0, &original).unwrap();
    handle.close().unwrap();

    let original_bytes_on_disk = std::fs::read(&path).unwrap();

    let delta_handle = Handle::open_for_delta_write(&[path.clone()]).unwrap();
    let overwrite = vec![0xEEu8; 512];
    delta_handle.write_at(0, &overwrite).unwrap();
    delta_handle.close().unwrap();

    let delta_path = path.with_extension("d01");
    assert!(delta_path.exists(), "delta write should create a .d01 segment");
    assert_eq!(
        std::fs::read(&path).unwrap(),
        original_bytes_on_disk,
        "the original evidence file must not be modified by a delta write"
    );

    let reopened = Handle::open(&[path, delta_path]).unwrap();
    let mut buf = vec![0u8; 512];
    assert_eq!(reopened.read_at(0, &mut buf).unwrap(), 512);
    assert_eq!(buf, overwrite);
}

/// Scenario 5: a logical-evidence permission record decodes into a typed
/// `Permission` under the record tree's read lock.
#[test]
fn logical_evidence_permission_record_decodes() {
    let mut payload: Vec<u8> = vec![0xFF, 0xFE];
    let text = "entry\n1\np\tn\ts\t\tpr\tnta\tnti\n\tSystem\tS-1-5-18\t\t2\t2032127\t16\n";
    payload.extend(text.encode_utf16().flat_map(|c| c.to_le_bytes()));

    let tree = LogicalTree::parse(&payload).unwrap();
    assert_eq!(tree.permission_count(), 1);
    assert_eq!(tree.source_count(), 0);
    assert_eq!(tree.file_entry_count(), 0);
}

/// Scenario 6: a section descriptor with a corrupted Adler-32 fails the
/// open outright — no handle is returned, and no leftover file descriptors
/// linger because the directory never escapes `Handle::open`.
#[test]
fn corrupt_section_descriptor_fails_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("corrupt.E01");

    let handle = Handle::create(&path, options(1, 1, 512)).unwrap();
    handle.write_at(0, &vec![0x01u8; 512]).unwrap();
    handle.close().unwrap();

    // The first section descriptor starts right after the 13-byte file
    // header; flip one of its reserved bytes to desync its Adler-32.
    let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(13 + 40)).unwrap();
    file.write_all(&[0xFF]).unwrap();
    drop(file);

    let err = Handle::open(&[path]).unwrap_err();
    assert!(matches!(err, EwfError::CorruptSegment { .. }));
}
