//! Bounded, sequential windows over a byte source.
//!
//! The reader owns one buffer that is refilled in place, so at most one chunk
//! (plus the carried overlap) is resident at any time regardless of the size
//! of the source.

use crate::error::{Error, Result};
use std::io::{ErrorKind, Read};
use tracing::trace;

/// One window of the source, borrowed from the reader's buffer
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    /// Absolute offset of `bytes[0]` in the source
    pub offset: u64,
    /// Carried overlap followed by freshly read bytes
    pub bytes: &'a [u8],
    /// Number of leading bytes repeated from the previous chunk
    pub carried: usize,
    /// Number of trailing bytes the next chunk will re-present; 0 for the last chunk
    pub tail: usize,
}

impl<'a> Chunk<'a> {
    /// Bytes that were not part of any previous chunk
    pub fn fresh(&self) -> &'a [u8] {
        &self.bytes[self.carried..]
    }

    /// Absolute offset one past the last byte of this chunk
    pub fn end(&self) -> u64 {
        self.offset + self.bytes.len() as u64
    }
}

/// Reads a source in windows of `chunk_size` fresh bytes up to `limit` bytes
#[derive(Debug)]
pub struct ChunkReader<R> {
    source: R,
    chunk_size: usize,
    overlap: usize,
    limit: u64,
    buf: Vec<u8>,
    filled: usize,
    position: u64,
    exhausted: bool,
    truncated: bool,
}

impl<R: Read> ChunkReader<R> {
    /// Creates a reader; `overlap` must be smaller than `chunk_size`
    pub fn new(source: R, chunk_size: usize, overlap: usize, limit: u64) -> Self {
        Self {
            source,
            chunk_size,
            overlap,
            limit,
            buf: Vec::new(),
            filled: 0,
            position: 0,
            exhausted: false,
            truncated: false,
        }
    }

    /// Absolute offset of the next fresh byte
    pub fn position(&self) -> u64 {
        self.position
    }

    /// True once the scan ceiling was hit while the source still had data
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Returns the next window, or `None` when the source or the ceiling is exhausted.
    ///
    /// When the source ends exactly at a chunk boundary, one last chunk holding
    /// only the carried tail (no fresh bytes) is returned so that matches left
    /// open at the end of the previous chunk can still be completed.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk<'_>>> {
        if self.exhausted {
            return Ok(None);
        }

        let remaining = self.limit.saturating_sub(self.position);
        if remaining == 0 {
            self.exhausted = true;
            self.truncated = self.has_more();
            return Ok(None);
        }
        let want = (self.chunk_size as u64).min(remaining) as usize;

        let carried = self.overlap.min(self.filled);
        if carried > 0 {
            self.buf.copy_within(self.filled - carried..self.filled, 0);
        }
        self.buf.resize(carried + want, 0);

        let read = fill(&mut self.source, &mut self.buf[carried..], self.position)?;
        if read < want {
            self.exhausted = true;
        }
        if read == 0 && carried == 0 {
            return Ok(None);
        }

        let offset = self.position - carried as u64;
        self.position += read as u64;
        self.filled = carried + read;

        let tail = if self.exhausted || self.position >= self.limit {
            0
        } else {
            self.overlap.min(self.filled)
        };

        trace!(
            "Chunk at {}..{} ({} carried, {} tail)",
            offset,
            self.position,
            carried,
            tail
        );

        Ok(Some(Chunk {
            offset,
            bytes: &self.buf[..self.filled],
            carried,
            tail,
        }))
    }

    /// Reads one byte past the ceiling. A failed read counts as "no more data"
    /// since nothing past the ceiling is ever scanned.
    fn has_more(&mut self) -> bool {
        let mut next = [0u8; 1];
        loop {
            match self.source.read(&mut next) {
                Ok(n) => return n > 0,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    trace!("Read past scan ceiling failed: {}", e);
                    return false;
                }
            }
        }
    }
}

/// Reads until `buf` is full or the source ends; returns the number of bytes read
pub(crate) fn fill<R: Read>(source: &mut R, buf: &mut [u8], base_offset: u64) -> Result<usize> {
    let mut filled = 0;

    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::source_read(base_offset + filled as u64, e)),
        }
    }

    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io;

    fn collect<R: Read>(reader: &mut ChunkReader<R>) -> Vec<(u64, Vec<u8>, usize)> {
        let mut out = Vec::new();
        while let Some(chunk) = reader.next_chunk().unwrap() {
            out.push((chunk.offset, chunk.bytes.to_vec(), chunk.carried));
        }
        out
    }

    fn tails<R: Read>(reader: &mut ChunkReader<R>) -> Vec<usize> {
        let mut out = Vec::new();
        while let Some(chunk) = reader.next_chunk().unwrap() {
            out.push(chunk.tail);
        }
        out
    }

    #[test]
    fn test_sequential_windows() {
        let data: Vec<u8> = (0..10).collect();
        let mut reader = ChunkReader::new(&data[..], 4, 0, u64::MAX);
        let chunks = collect(&mut reader);

        assert_eq!(
            chunks,
            vec![
                (0, vec![0, 1, 2, 3], 0),
                (4, vec![4, 5, 6, 7], 0),
                (8, vec![8, 9], 0),
            ]
        );
        assert!(!reader.truncated());
    }

    #[test]
    fn test_overlap_carries_tail() {
        let data: Vec<u8> = (0..10).collect();
        let mut reader = ChunkReader::new(&data[..], 4, 2, u64::MAX);
        let chunks = collect(&mut reader);

        assert_eq!(
            chunks,
            vec![
                (0, vec![0, 1, 2, 3], 0),
                (2, vec![2, 3, 4, 5, 6, 7], 2),
                (6, vec![6, 7, 8, 9], 2),
            ]
        );
    }

    #[test]
    fn test_tail_is_zero_only_for_the_last_chunk() {
        let data: Vec<u8> = (0..10).collect();
        assert_eq!(tails(&mut ChunkReader::new(&data[..], 4, 2, u64::MAX)), vec![2, 2, 0]);
        assert_eq!(tails(&mut ChunkReader::new(&data[..], 4, 0, u64::MAX)), vec![0, 0, 0]);
        // The ceiling ends the scan, so nothing is carried past it
        assert_eq!(tails(&mut ChunkReader::new(&data[..], 4, 2, 8)), vec![2, 0]);
    }

    #[test]
    fn test_source_ending_on_boundary_flushes_tail() {
        let data: Vec<u8> = (0..8).collect();
        let mut reader = ChunkReader::new(&data[..], 4, 2, u64::MAX);

        let first = reader.next_chunk().unwrap().unwrap();
        assert_eq!(first.tail, 2);
        let second = reader.next_chunk().unwrap().unwrap();
        assert_eq!((second.offset, second.tail), (2, 2));

        let flush = reader.next_chunk().unwrap().unwrap();
        assert_eq!(flush.offset, 6);
        assert_eq!(flush.bytes, &[6, 7]);
        assert!(flush.fresh().is_empty());
        assert_eq!(flush.tail, 0);
        assert_eq!(flush.end(), 8);

        assert!(reader.next_chunk().unwrap().is_none());
        assert_eq!(reader.position(), 8);
    }

    #[test]
    fn test_scan_ceiling() {
        let data = vec![1u8; 100];
        let mut reader = ChunkReader::new(&data[..], 30, 0, 50);
        let chunks = collect(&mut reader);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].0, 30);
        assert_eq!(chunks[1].1.len(), 20);
        assert_eq!(reader.position(), 50);
        assert!(reader.truncated());
    }

    #[test]
    fn test_ceiling_equal_to_source_is_not_truncated() {
        let data = vec![1u8; 50];
        let mut reader = ChunkReader::new(&data[..], 25, 0, 50);
        assert_eq!(collect(&mut reader).len(), 2);
        assert!(!reader.truncated());
    }

    #[test]
    fn test_empty_source() {
        let mut reader = ChunkReader::new(io::empty(), 16, 4, 1024);
        assert!(reader.next_chunk().unwrap().is_none());
        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_short_reads_are_filled() {
        // A reader that hands out at most 3 bytes per call
        struct Trickle<'a>(&'a [u8]);
        impl Read for Trickle<'_> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                let n = buf.len().min(3).min(self.0.len());
                buf[..n].copy_from_slice(&self.0[..n]);
                self.0 = &self.0[n..];
                Ok(n)
            }
        }

        let data: Vec<u8> = (0..20).collect();
        let mut reader = ChunkReader::new(Trickle(&data), 8, 0, u64::MAX);
        let chunks = collect(&mut reader);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].1, (0..8).collect::<Vec<u8>>());
    }

    #[test]
    fn test_read_failure_reports_offset() {
        struct Failing {
            served: bool,
        }
        impl Read for Failing {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.served {
                    return Err(io::Error::new(io::ErrorKind::Other, "bad sector"));
                }
                self.served = true;
                let n = buf.len().min(10);
                buf[..n].fill(0xEE);
                Ok(n)
            }
        }

        let mut reader = ChunkReader::new(Failing { served: false }, 10, 0, u64::MAX);
        assert!(reader.next_chunk().unwrap().is_some());
        match reader.next_chunk() {
            Err(Error::SourceRead { offset, .. }) => assert_eq!(offset, 10),
            other => panic!("expected SourceRead, got {:?}", other),
        }
    }

    #[test]
    fn test_fresh_and_end() {
        let data: Vec<u8> = (0..10).collect();
        let mut reader = ChunkReader::new(&data[..], 4, 2, u64::MAX);
        reader.next_chunk().unwrap();
        let chunk = reader.next_chunk().unwrap().unwrap();
        assert_eq!(chunk.fresh(), &[4, 5, 6, 7]);
        assert_eq!(chunk.end(), 8);
    }
}
