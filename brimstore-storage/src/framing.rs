//! Checksum-framed file I/O.
//!
//! Every `interval` logical bytes the writer emits a 4-byte murmur3-32
//! checksum of the preceding section; the final partial section is
//! checksummed on close. Readers verify sections, transparently skip the
//! checksum bytes, and address the stream by logical (pre-framing) offset.
//!
//! The writer can also `checkpoint`: the partial tail section is written
//! out with a provisional checksum and rewritten in place as it grows.
//! This keeps the whole logical stream readable while the file is still
//! being appended to, which the store relies on when it repoints freshly
//! flushed keys at their disk locations.

use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{ByteOrder, LittleEndian};

use brimstore_core::error::{Error, Result};

fn murmur3_32(data: &[u8]) -> u32 {
    // the murmur3 crate hashes an io::Read; a slice read cannot fail
    murmur3::murmur3_32(&mut &data[..], 0).expect("hashing a slice cannot fail")
}

/// Writer half of the framing: buffers logical bytes and emits
/// `section ‖ checksum` units to the underlying file.
pub struct ChecksummedWriter<W: Write + Seek> {
    inner: W,
    interval: usize,
    section: Vec<u8>,
    sections_emitted: u64,
    /// The partial tail was written with a provisional checksum; the next
    /// append must rewind and rewrite it.
    checkpointed: bool,
}

impl<W: Write + Seek> ChecksummedWriter<W> {
    pub fn new(inner: W, interval: usize) -> Self {
        Self {
            inner,
            interval,
            section: Vec::with_capacity(interval),
            sections_emitted: 0,
            checkpointed: false,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Logical bytes accepted so far.
    pub fn logical_len(&self) -> u64 {
        self.sections_emitted * self.interval as u64 + self.section.len() as u64
    }

    /// Physical file size once finished: the logical bytes plus one
    /// checksum per section.
    pub fn physical_len(&self) -> u64 {
        let mut len = self.logical_len() + self.sections_emitted * 4;
        if !self.section.is_empty() {
            len += 4;
        }
        len
    }

    /// Make everything accepted so far readable. Complete sections are
    /// already on disk; the partial tail is written with a provisional
    /// checksum and will be rewritten as it grows.
    pub fn checkpoint(&mut self) -> io::Result<()> {
        if !self.section.is_empty() {
            self.rewind_if_checkpointed()?;
            self.write_section_bytes()?;
            self.checkpointed = true;
        }
        self.inner.flush()
    }

    /// Flush the final partial section and return the physical bytes
    /// written over the writer's lifetime.
    pub fn finish(mut self) -> io::Result<u64> {
        let physical = self.physical_len();
        if !self.section.is_empty() {
            self.rewind_if_checkpointed()?;
            self.write_section_bytes()?;
            self.section.clear();
        }
        self.inner.flush()?;
        Ok(physical)
    }

    fn section_start(&self) -> u64 {
        self.sections_emitted * (self.interval as u64 + 4)
    }

    fn rewind_if_checkpointed(&mut self) -> io::Result<()> {
        if self.checkpointed {
            let start = self.section_start();
            self.inner.seek(SeekFrom::Start(start))?;
            self.checkpointed = false;
        }
        Ok(())
    }

    fn write_section_bytes(&mut self) -> io::Result<()> {
        let sum = murmur3_32(&self.section);
        self.inner.write_all(&self.section)?;
        self.inner.write_all(&sum.to_le_bytes())
    }

    fn emit_full_section(&mut self) -> io::Result<()> {
        self.rewind_if_checkpointed()?;
        self.write_section_bytes()?;
        self.sections_emitted += 1;
        self.section.clear();
        Ok(())
    }
}

impl<W: Write + Seek> Write for ChecksummedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut remaining = buf;
        while !remaining.is_empty() {
            let room = self.interval - self.section.len();
            let take = room.min(remaining.len());
            self.section.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            if self.section.len() == self.interval {
                self.emit_full_section()?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader half of the framing: loads and verifies one section at a time
/// and serves reads at logical offsets.
pub struct ChecksummedReader<R: Read + Seek> {
    inner: R,
    interval: usize,
    /// Verified payload of the loaded section.
    section: Vec<u8>,
    section_index: u64,
    pos: usize,
    loaded: bool,
}

impl<R: Read + Seek> ChecksummedReader<R> {
    pub fn new(inner: R, interval: usize) -> Self {
        Self {
            inner,
            interval,
            section: Vec::with_capacity(interval + 4),
            section_index: 0,
            pos: 0,
            loaded: false,
        }
    }

    /// Position the reader at a logical offset.
    pub fn seek(&mut self, logical: u64) -> Result<()> {
        let index = logical / self.interval as u64;
        let pos = (logical % self.interval as u64) as usize;
        if !self.loaded || index != self.section_index {
            if !self.load_section(index)? {
                return Err(Error::InvalidData {
                    message: format!("seek past end of framed stream: {logical}"),
                });
            }
        }
        if pos > self.section.len() {
            return Err(Error::InvalidData {
                message: format!("seek past end of framed stream: {logical}"),
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.pos == self.section.len() {
                let next = if self.loaded { self.section_index + 1 } else { 0 };
                if !self.load_section(next)? {
                    return Err(Error::InvalidData {
                        message: "unexpected end of framed stream".into(),
                    });
                }
            }
            let take = (buf.len() - filled).min(self.section.len() - self.pos);
            buf[filled..filled + take].copy_from_slice(&self.section[self.pos..self.pos + take]);
            self.pos += take;
            filled += take;
        }
        Ok(())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.read_exact(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Read the rest of the logical stream, e.g. to validate a whole file.
    pub fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let mut total = 0;
        loop {
            if self.pos < self.section.len() {
                out.extend_from_slice(&self.section[self.pos..]);
                total += self.section.len() - self.pos;
                self.pos = self.section.len();
            }
            // a short section is the final one
            if self.loaded && self.section.len() < self.interval {
                break;
            }
            let next = if self.loaded { self.section_index + 1 } else { 0 };
            if !self.load_section(next)? {
                break;
            }
        }
        Ok(total)
    }

    fn load_section(&mut self, index: u64) -> Result<bool> {
        match self.try_load_section(index) {
            // The active file's tail section may be rewritten underneath
            // us; one retry resolves the torn read.
            Err(Error::ChecksumMismatch { .. }) => self.try_load_section(index),
            other => other,
        }
    }

    fn try_load_section(&mut self, index: u64) -> Result<bool> {
        let start = index * (self.interval as u64 + 4);
        self.inner.seek(SeekFrom::Start(start))?;
        self.section.resize(self.interval + 4, 0);
        let mut got = 0;
        while got < self.section.len() {
            let n = self.inner.read(&mut self.section[got..])?;
            if n == 0 {
                break;
            }
            got += n;
        }
        if got == 0 {
            self.section.clear();
            self.pos = 0;
            self.loaded = false;
            return Ok(false);
        }
        if got < 4 {
            return Err(Error::InvalidData {
                message: "truncated checksum section".into(),
            });
        }
        let payload = got - 4;
        let expected = LittleEndian::read_u32(&self.section[payload..got]);
        let actual = murmur3_32(&self.section[..payload]);
        if actual != expected {
            return Err(Error::ChecksumMismatch { section: index });
        }
        self.section.truncate(payload);
        self.section_index = index;
        self.pos = 0;
        self.loaded = true;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const INTERVAL: usize = 128;

    fn frame(data: &[u8]) -> Vec<u8> {
        let mut shared = Cursor::new(Vec::new());
        {
            let mut writer = ChecksummedWriter::new(&mut shared, INTERVAL);
            writer.write_all(data).unwrap();
            writer.finish().unwrap();
        }
        shared.into_inner()
    }

    #[test]
    fn round_trips_across_section_boundaries() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let physical = frame(&data);
        // 7 full sections of 128 bytes plus a 104-byte tail, 8 checksums
        assert_eq!(physical.len(), 1000 + 8 * 4);

        let mut reader = ChecksummedReader::new(Cursor::new(&physical[..]), INTERVAL);
        reader.seek(0).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn seek_addresses_logical_offsets() {
        let data: Vec<u8> = (0..2000u32).map(|i| (i % 199) as u8).collect();
        let physical = frame(&data);
        let mut reader = ChecksummedReader::new(Cursor::new(&physical[..]), INTERVAL);

        // a read spanning two sections
        reader.seek(120).unwrap();
        let mut buf = [0u8; 20];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[120..140]);

        // backwards seek into an earlier section
        reader.seek(5).unwrap();
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[5..8]);
    }

    #[test]
    fn corruption_is_detected() {
        let data = vec![7u8; 600];
        let mut physical = frame(&data);
        // flip a payload byte inside the second section
        physical[INTERVAL + 4 + 10] ^= 0xFF;
        let mut reader = ChecksummedReader::new(Cursor::new(&physical[..]), INTERVAL);
        assert!(reader.seek(0).is_ok());
        let err = reader.seek((INTERVAL + 10) as u64).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { section: 1 }));
    }

    #[test]
    fn checkpoint_keeps_the_tail_readable() {
        let mut shared = Cursor::new(Vec::new());
        let mut writer = ChecksummedWriter::new(&mut shared, INTERVAL);
        writer.write_all(&[1u8; 100]).unwrap();
        writer.checkpoint().unwrap();
        {
            let snapshot = writer.get_ref().get_ref().clone();
            let mut reader = ChecksummedReader::new(Cursor::new(&snapshot[..]), INTERVAL);
            reader.seek(0).unwrap();
            let mut buf = [0u8; 100];
            reader.read_exact(&mut buf).unwrap();
            assert_eq!(buf, [1u8; 100]);
        }

        // appending past the checkpoint rewrites the tail in place
        writer.write_all(&[2u8; 100]).unwrap();
        writer.checkpoint().unwrap();
        {
            let snapshot = writer.get_ref().get_ref().clone();
            let mut reader = ChecksummedReader::new(Cursor::new(&snapshot[..]), INTERVAL);
            reader.seek(0).unwrap();
            let mut buf = vec![0u8; 200];
            reader.read_exact(&mut buf).unwrap();
            assert_eq!(&buf[..100], &[1u8; 100][..]);
            assert_eq!(&buf[100..], &[2u8; 100][..]);
        }

        writer.finish().unwrap();
        let physical = shared.into_inner();
        // two sections: one full, one 72-byte tail
        assert_eq!(physical.len(), 200 + 2 * 4);
    }

    #[test]
    fn empty_stream_reads_empty() {
        let physical = frame(&[]);
        assert!(physical.is_empty());
        let mut reader = ChecksummedReader::new(Cursor::new(&physical[..]), INTERVAL);
        let mut out = Vec::new();
        assert_eq!(reader.read_to_end(&mut out).unwrap(), 0);
        assert!(reader.seek(0).is_err());
    }
}
