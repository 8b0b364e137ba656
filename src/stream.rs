//! Virtual stream: maps a logical media offset to a chunk, owns a one-chunk
//! decoded cache, and implements `read_at` / `write_at` / `seek` over the
//! chunk grid.

use crate::chunk::{read_chunk, write_chunk};
use crate::error::{EwfError, Result};
use crate::offset_table::OffsetTable;
use crate::segment::SegmentDirectory;
use std::io::{self, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
struct CachedChunk {
    chunk: usize,
    bytes: Vec<u8>,
}

/// Cursor plus one-chunk cache over the chunk grid described by
/// `media_size`/`chunk_size`. Invariant: `cursor_offset <= media_size`; the
/// cache, when populated, holds the decompressed bytes of a valid chunk
/// number.
///
/// `cursor_offset` is the only field a reader may touch without the
/// handle's exclusive lock (see [`Self::try_read_cached`]): every other
/// field is mutated solely under the writer side of the handle's
/// `RwLock`, so it stays a plain field. `cursor_offset` alone is an atomic,
/// because concurrent cache-hit readers each advance it under no more than
/// a shared lock.
#[derive(Debug)]
pub struct VirtualStream {
    media_size: u64,
    chunk_size: u64,
    cursor_offset: AtomicU64,
    cached: Option<CachedChunk>,
}

impl VirtualStream {
    pub fn new(media_size: u64, chunk_size: u64) -> Self {
        VirtualStream {
            media_size,
            chunk_size,
            cursor_offset: AtomicU64::new(0),
            cached: None,
        }
    }

    pub fn media_size(&self) -> u64 {
        self.media_size
    }

    pub fn position(&self) -> u64 {
        self.cursor_offset.load(Ordering::SeqCst)
    }

    /// Updates `media_size` as the image grows during a write session.
    pub fn set_media_size(&mut self, media_size: u64) {
        self.media_size = media_size;
    }

    /// Computes the new absolute offset for `whence`/`offset` and clamps it
    /// to `[0, media_size]`. Never touches the underlying file.
    pub fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let current = self.cursor_offset.load(Ordering::SeqCst);
        let new_offset: i64 = match pos {
            SeekFrom::Start(o) => o as i64,
            SeekFrom::Current(o) => current as i64 + o,
            SeekFrom::End(o) => self.media_size as i64 + o,
        };
        if new_offset < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of image",
            ));
        }
        let clamped = (new_offset as u64).min(self.media_size);
        self.cursor_offset.store(clamped, Ordering::SeqCst);
        Ok(clamped)
    }

    /// Shared-lock fast path for [`crate::handle::Handle::read_at`]: if the
    /// one-chunk cache already holds the chunk `offset` falls in, and it
    /// covers the whole of `buf` (or runs to end-of-media within that
    /// chunk), copies the bytes and advances the cursor without touching
    /// the segment directory or offset table at all. Returns `None` when
    /// the cache doesn't cover the request, leaving the caller to retry
    /// under the exclusive lock via [`Self::read`].
    pub fn try_read_cached(&self, offset: u64, buf: &mut [u8]) -> Option<usize> {
        if buf.is_empty() {
            return Some(0);
        }
        if offset >= self.media_size {
            self.cursor_offset.store(self.media_size, Ordering::SeqCst);
            return Some(0);
        }
        let cached = self.cached.as_ref()?;
        let chunk_number = (offset / self.chunk_size) as usize;
        if cached.chunk != chunk_number {
            return None;
        }
        let in_chunk = (offset % self.chunk_size) as usize;
        let available_in_chunk = cached.bytes.len().saturating_sub(in_chunk);
        let remaining_media = (self.media_size - offset) as usize;
        let take = available_in_chunk.min(buf.len()).min(remaining_media);
        if take == 0 || (take < buf.len() && take < remaining_media) {
            // Either nothing usable is cached here, or satisfying the
            // request would cross into a chunk that isn't cached — let the
            // exclusive-lock path decode it instead of partially filling
            // `buf`.
            return None;
        }
        buf[..take].copy_from_slice(&cached.bytes[in_chunk..in_chunk + take]);
        self.cursor_offset.store(offset + take as u64, Ordering::SeqCst);
        Some(take)
    }

    /// Fills `buf` from the current cursor, pulling chunks through the
    /// chunk store as needed and advancing the cursor. Returns the number
    /// of bytes copied (a short read signals EOF, never an error).
    pub fn read(
        &mut self,
        directory: &mut SegmentDirectory,
        offset_table: &OffsetTable,
        buf: &mut [u8],
    ) -> Result<usize> {
        let mut cursor = self.cursor_offset.load(Ordering::SeqCst);
        let mut total = 0usize;
        while total < buf.len() && cursor < self.media_size {
            let chunk_number = (cursor / self.chunk_size) as usize;
            let in_chunk = (cursor % self.chunk_size) as usize;

            self.ensure_cached(directory, offset_table, chunk_number)?;
            let cached = self.cached.as_ref().unwrap();

            let available_in_chunk = cached.bytes.len().saturating_sub(in_chunk);
            if available_in_chunk == 0 {
                break;
            }
            let remaining_buf = buf.len() - total;
            let remaining_media = (self.media_size - cursor) as usize;
            let take = available_in_chunk.min(remaining_buf).min(remaining_media);
            if take == 0 {
                break;
            }

            buf[total..total + take].copy_from_slice(&cached.bytes[in_chunk..in_chunk + take]);
            total += take;
            cursor += take as u64;
        }
        self.cursor_offset.store(cursor, Ordering::SeqCst);
        Ok(total)
    }

    /// Writes `buf` starting at the cursor. A write that does not align to
    /// a full chunk triggers a read-modify-write of that chunk; full chunks
    /// are written straight through. `current_segment` names the segment
    /// file the chunk store should append new chunk data to.
    pub fn write(
        &mut self,
        directory: &mut SegmentDirectory,
        offset_table: &mut OffsetTable,
        buf: &[u8],
        current_segment: u16,
        try_compress: bool,
    ) -> Result<usize> {
        let mut cursor = self.cursor_offset.load(Ordering::SeqCst);
        let mut total = 0usize;
        while total < buf.len() {
            let chunk_number = (cursor / self.chunk_size) as usize;
            let in_chunk = (cursor % self.chunk_size) as usize;
            let remaining_buf = buf.len() - total;

            let mut chunk_bytes = if in_chunk != 0 || remaining_buf < self.chunk_size as usize {
                // Partial chunk: read-modify-write.
                match read_chunk(
                    directory,
                    offset_table,
                    chunk_number,
                    self.chunk_size as usize,
                ) {
                    Ok(existing) => existing,
                    Err(EwfError::NotFound { .. }) => vec![0u8; self.chunk_size as usize],
                    Err(e) => return Err(e),
                }
            } else {
                vec![0u8; self.chunk_size as usize]
            };
            if chunk_bytes.len() < self.chunk_size as usize {
                chunk_bytes.resize(self.chunk_size as usize, 0);
            }

            let take = (self.chunk_size as usize - in_chunk).min(remaining_buf);
            chunk_bytes[in_chunk..in_chunk + take].copy_from_slice(&buf[total..total + take]);

            write_chunk(
                directory,
                offset_table,
                chunk_number,
                &chunk_bytes,
                current_segment,
                try_compress,
            )?;

            self.cached = Some(CachedChunk {
                chunk: chunk_number,
                bytes: chunk_bytes,
            });

            total += take;
            cursor += take as u64;
            if cursor > self.media_size {
                self.media_size = cursor;
            }
        }
        self.cursor_offset.store(cursor, Ordering::SeqCst);
        Ok(total)
    }

    fn ensure_cached(
        &mut self,
        directory: &mut SegmentDirectory,
        offset_table: &OffsetTable,
        chunk_number: usize,
    ) -> Result<()> {
        if self
            .cached
            .as_ref()
            .map(|c| c.chunk == chunk_number)
            .unwrap_or(false)
        {
            return Ok(());
        }
        let bytes = read_chunk(
            directory,
            offset_table,
            chunk_number,
            self.chunk_size as usize,
        )?;
        self.cached = Some(CachedChunk {
            chunk: chunk_number,
            bytes,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{OpenSegment, SegmentFileHeader, SegmentKind};
    use std::io::Write as _;
    use tempfile::tempfile;

    fn fresh_directory_with_chunks(chunk_size: u64, chunks: &[&[u8]]) -> (SegmentDirectory, OffsetTable) {
        let mut file = tempfile().unwrap();
        let header = SegmentFileHeader {
            kind: SegmentKind::Evidence,
            segment_number: 1,
        };
        file.write_all(&header.to_bytes()).unwrap();
        let mut directory = SegmentDirectory::default();
        directory.evidence.push(OpenSegment {
            path: std::path::PathBuf::new(),
            header,
            file,
        });
        let mut table = OffsetTable::default();
        for (i, chunk) in chunks.iter().enumerate() {
            crate::chunk::write_chunk(&mut directory, &mut table, i, chunk, 1, false).unwrap();
        }
        let _ = chunk_size;
        (directory, table)
    }

    #[test]
    fn read_across_chunk_boundary() {
        let chunk_size = 8u64;
        let chunk0 = vec![0x41u8; 8];
        let chunk1 = vec![0x42u8; 8];
        let (mut directory, table) = fresh_directory_with_chunks(chunk_size, &[&chunk0, &chunk1]);

        let mut stream = VirtualStream::new(16, chunk_size);
        let mut buf = [0u8; 10];
        let n = stream.read(&mut directory, &table, &mut buf).unwrap();
        assert_eq!(n, 10);
        assert_eq!(&buf[0..6], &chunk0[0..6]);
        assert_eq!(&buf[6..8], &chunk1[0..2]);
    }

    #[test]
    fn read_at_media_size_returns_zero() {
        let chunk0 = vec![0u8; 8];
        let (mut directory, table) = fresh_directory_with_chunks(8, &[&chunk0]);
        let mut stream = VirtualStream::new(8, 8);
        stream.seek(SeekFrom::Start(8)).unwrap();
        let mut buf = [0u8; 4];
        let n = stream.read(&mut directory, &table, &mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn seek_clamps_to_media_size() {
        let chunk0 = vec![0u8; 8];
        let (_directory, _table) = fresh_directory_with_chunks(8, &[&chunk0]);
        let mut stream = VirtualStream::new(8, 8);
        let pos = stream.seek(SeekFrom::Start(1000)).unwrap();
        assert_eq!(pos, 8);
    }

    #[test]
    fn write_then_read_round_trips_partial_chunk() {
        let chunk0 = vec![0u8; 16];
        let (mut directory, mut table) = fresh_directory_with_chunks(16, &[&chunk0]);
        let mut stream = VirtualStream::new(16, 16);
        stream.seek(SeekFrom::Start(4)).unwrap();
        stream
            .write(&mut directory, &mut table, &[0xCC; 4], 1, false)
            .unwrap();

        let mut read_stream = VirtualStream::new(16, 16);
        let mut buf = [0u8; 16];
        read_stream.read(&mut directory, &table, &mut buf).unwrap();
        assert_eq!(&buf[4..8], &[0xCC; 4]);
        assert_eq!(&buf[0..4], &[0u8; 4]);
    }
}
