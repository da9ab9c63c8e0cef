//! A bounded, read-only view over a sub-range of a larger stream (§4.3).
//!
//! Generalizes the teacher's flat, slice-backed `ByteReader` into an adapter
//! over any `Read + Seek` backing stream, so archives can be nested over
//! files, sockets, or in-memory buffers alike. Std-only: the restricted
//! stream view is meaningless without `std::io`.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::CoreError;

/// A backing stream a [`RestrictedStreamView`] can be built over.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// A bounded, read-only adapter exposing `[origin, origin + length)` of a
/// backing stream as if it were a standalone stream with its own length and
/// position.
///
/// The view does not own the backing stream — it borrows it for the scope of
/// one archive body (§5, resource policy).
pub struct RestrictedStreamView<'a> {
    backing: &'a mut dyn ReadSeek,
    origin: u64,
    length: u64,
    pos: u64,
    closed: bool,
}

impl<'a> RestrictedStreamView<'a> {
    /// Construct a view starting at the backing stream's current position,
    /// covering at most `length` bytes (clamped to whatever remains in the
    /// backing stream).
    pub fn new(backing: &'a mut dyn ReadSeek, length: u64) -> CoreResultIo<Self> {
        let origin = backing.stream_position()?;
        let backing_len = backing.seek(SeekFrom::End(0))?;
        backing.seek(SeekFrom::Start(origin))?;
        let available = backing_len.saturating_sub(origin);
        Ok(Self { backing, origin, length: length.min(available), pos: 0, closed: false })
    }

    /// Total length of the view, fixed at construction.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.length
    }

    /// Whether the view covers zero bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Current position within the view (`0..=len()`).
    #[must_use]
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Bytes left to read before the view is exhausted.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.length - self.pos
    }

    /// Mark the view closed; any further operation fails with
    /// [`CoreError::Closed`].
    pub fn close(&mut self) {
        self.closed = true;
    }

    fn check_open(&self) -> io::Result<()> {
        if self.closed {
            Err(to_io(CoreError::Closed))
        } else {
            Ok(())
        }
    }
}

type CoreResultIo<T> = io::Result<T>;

fn to_io(e: CoreError) -> io::Error {
    io::Error::other(e)
}

impl<'a> Read for RestrictedStreamView<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_open()?;
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(0);
        }
        let cap = remaining.min(buf.len() as u64) as usize;
        self.backing.seek(SeekFrom::Start(self.origin + self.pos))?;
        let n = self.backing.read(&mut buf[..cap])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<'a> Write for RestrictedStreamView<'a> {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        self.check_open()?;
        Err(to_io(CoreError::NotSupported { reason: "write on a read-only restricted stream view" }))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_open()?;
        Err(to_io(CoreError::NotSupported { reason: "flush on a read-only restricted stream view" }))
    }
}

impl<'a> Seek for RestrictedStreamView<'a> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.check_open()?;
        let target: i128 = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(offset) => i128::from(self.pos) + i128::from(offset),
            SeekFrom::End(offset) => {
                if offset > 0 {
                    return Err(to_io(CoreError::NotSupported {
                        reason: "seek from end with a positive offset",
                    }));
                }
                i128::from(self.length) + i128::from(offset)
            }
        };
        if target < 0 || target > i128::from(self.length) {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek target out of range"));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}
