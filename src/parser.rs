//! Provides the [`Container`] reader and the [`DirectoryWalker`] that can be used to parse
//! 'rkosftab' firmware images directly from a seekable source.

/// Provides [`FormatError`], [`RangeError`] and [`ReadError`] that describe errors which may
/// occur while reading a [`Container`](../struct.Container.html).
pub mod error {
    use std::{error::Error, fmt, io};
    use thiserror::Error;

    /// An error which may occur when validating the image header or walking the tag directory.
    #[derive(Error, Debug)]
    pub enum FormatError {
        /// Returned when the image is shorter than the fixed header.
        #[error("file is too short to be a ftab file")]
        TooShort,
        /// Returned when the image does not contain the 'rkosftab' magic value at offset 32.
        #[error("firmware is invalid (magic value is {})", .0.escape_ascii())]
        UnknownMagic([u8; 8]),
        /// Returned when a tag directory entry extends past the end of the image.
        #[error("tag directory entry at {offset:#x} is past the end of the file")]
        TruncatedDirectory { offset: u64 },
    }

    /// The way a byte range declared by the image violates the image bounds.
    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    pub enum RangeViolation {
        NegativeOffset,
        NegativeSize,
        PastEnd,
    }

    /// Returned when the byte range of the ticket or of a segment does not fit into the image.
    #[derive(Debug)]
    #[non_exhaustive]
    pub struct RangeError {
        /// The name of the artifact the range was going to be saved to.
        pub name: String,
        pub offset: i32,
        pub size: i32,
        pub container_len: u64,
        pub violation: RangeViolation,
    }

    impl fmt::Display for RangeError {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            let reason = match self.violation {
                RangeViolation::NegativeOffset => "has a negative offset",
                RangeViolation::NegativeSize => "has a negative size",
                RangeViolation::PastEnd => "exceeds past the end of the file",
            };

            write!(
                f,
                "range of {} (offset {:#x}, size {:#x}) {} (file length is {:#x})",
                self.name, self.offset, self.size, reason, self.container_len
            )
        }
    }

    impl Error for RangeError {}

    /// Any error returned by [`Container`](../struct.Container.html) methods.
    #[derive(Error, Debug)]
    pub enum ReadError {
        #[error("{0}")]
        Format(#[from] FormatError),
        #[error("{0}")]
        Range(#[from] RangeError),
        #[error("{0}")]
        Io(#[from] io::Error),
    }
}

use crate::format::*;
pub use error::{FormatError, RangeError, RangeViolation, ReadError};
use std::io::{self, Read, Seek, SeekFrom};

/// Reads a 32-bit little-endian integer from the start of a byte slice and returns a tuple of the
/// slice's tail and the integer.
///
/// # Panics
/// Will panic if the slice is shorter than 4 bytes.
#[inline(always)]
fn get_u32_le(bytes: &[u8]) -> (&[u8], u32) {
    let (head, tail) = bytes.split_at(4);
    let mut buf = [0u8; 4];
    buf.copy_from_slice(head);
    (tail, u32::from_le_bytes(buf))
}

#[inline(always)]
fn get_i32_le(bytes: &[u8]) -> (&[u8], i32) {
    let (tail, value) = get_u32_le(bytes);
    (tail, value as i32)
}

#[inline(always)]
fn is_magic(bytes: &[u8]) -> bool {
    bytes.len() == MAGIC.len() && bytes == MAGIC
}

/// An absolute byte range inside a [`Container`] which is known to be in bounds.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Extent {
    pub offset: u64,
    pub len: u64,
}

/// A firmware image opened for reading.
#[derive(Debug)]
pub struct Container<R> {
    inner: R,
    len: u64,
}

impl<R: Read + Seek> Container<R> {
    /// Wraps a seekable source, determining its length.
    pub fn new(mut inner: R) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        Ok(Self { inner, len })
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.read_exact(buf)
    }

    /// Checks that the image carries the 'rkosftab' magic value at offset 32.
    ///
    /// # Errors
    /// Returns [`FormatError::UnknownMagic`] on mismatch and [`FormatError::TooShort`] if the
    /// image ends before the magic value does.
    pub fn validate_magic(&mut self) -> Result<(), ReadError> {
        if self.len < MAGIC_OFFSET + MAGIC.len() as u64 {
            return Err(FormatError::TooShort.into());
        }

        let mut magic = [0u8; 8];
        self.read_at(MAGIC_OFFSET, &mut magic)?;

        if is_magic(&magic) {
            Ok(())
        } else {
            Err(FormatError::UnknownMagic(magic).into())
        }
    }

    /// Validates the magic value and parses the fixed header.
    pub fn read_header(&mut self) -> Result<Header, ReadError> {
        self.validate_magic()?;

        if self.len < HEADER_LEN as u64 {
            return Err(FormatError::TooShort.into());
        }

        let mut buf = [0u8; HEADER_LEN];
        self.read_at(0, &mut buf)?;

        let (bytes, unk_0) = get_u32_le(&buf);
        let (bytes, unk_1) = get_u32_le(bytes);
        let (bytes, unk_2) = get_u32_le(bytes);
        let (bytes, unk_3) = get_u32_le(bytes);
        let (bytes, ticket_offset) = get_i32_le(bytes);
        let (bytes, ticket_size) = get_i32_le(bytes);
        let (bytes, unk_4) = get_u32_le(bytes);
        let (bytes, unk_5) = get_u32_le(bytes);
        let (magic, bytes) = bytes.split_at(MAGIC.len());
        let (bytes, segments_count) = get_u32_le(bytes);
        let (_, unk_6) = get_u32_le(bytes);

        let mut magic_bytes = [0u8; 8];
        magic_bytes.copy_from_slice(magic);

        Ok(Header {
            unk_0,
            unk_1,
            unk_2,
            unk_3,
            ticket_offset,
            ticket_size,
            unk_4,
            unk_5,
            magic: magic_bytes,
            segments_count,
            unk_6,
        })
    }

    /// Reads the directory entry located at an absolute offset.
    pub fn read_entry(&mut self, offset: u64) -> Result<TagEntry, ReadError> {
        if offset
            .checked_add(ENTRY_LEN as u64)
            .map_or(true, |end| end > self.len)
        {
            return Err(FormatError::TruncatedDirectory { offset }.into());
        }

        let mut buf = [0u8; ENTRY_LEN];
        self.read_at(offset, &mut buf)?;

        let (tag, bytes) = buf.split_at(4);
        let (bytes, seg_off) = get_i32_le(bytes);
        let (bytes, seg_len) = get_i32_le(bytes);
        let (_, reserved) = get_u32_le(bytes);

        let mut tag_bytes = [0u8; 4];
        tag_bytes.copy_from_slice(tag);

        Ok(TagEntry {
            tag: Tag(tag_bytes),
            offset: seg_off,
            size: seg_len,
            reserved,
        })
    }

    /// Converts a signed range declared by the image into an [`Extent`], ensuring it lies
    /// entirely inside the image.
    pub fn checked_extent(&self, name: &str, offset: i32, size: i32) -> Result<Extent, RangeError> {
        let error = |violation| RangeError {
            name: name.to_owned(),
            offset,
            size,
            container_len: self.len,
            violation,
        };

        let Ok(start) = u64::try_from(offset) else {
            return Err(error(RangeViolation::NegativeOffset));
        };
        let Ok(len) = u64::try_from(size) else {
            return Err(error(RangeViolation::NegativeSize));
        };

        // Both values fit in 31 bits so this can't overflow.
        if start + len > self.len {
            return Err(error(RangeViolation::PastEnd));
        }

        Ok(Extent { offset: start, len })
    }

    /// Returns the extent of the ticket blob or `None` if the header declares no ticket.
    pub fn ticket(&self, header: &Header) -> Result<Option<Extent>, RangeError> {
        if header.ticket_size == 0 {
            debug!("Ticket is not present.");
            return Ok(None);
        }

        debug!(
            "Ticket offset is {:#x}, size is {:#x}.",
            header.ticket_offset, header.ticket_size
        );

        self.checked_extent(TICKET_NAME, header.ticket_offset, header.ticket_size)
            .map(Some)
    }

    /// Reads exactly the bytes covered by an extent.
    ///
    /// # Errors
    /// Returns an error of kind `UnexpectedEof` if the source yields fewer bytes than requested,
    /// so a short read never reaches an artifact.
    pub fn read_extent(&mut self, extent: Extent) -> io::Result<Vec<u8>> {
        self.inner.seek(SeekFrom::Start(extent.offset))?;

        let mut data = Vec::with_capacity(extent.len.try_into().unwrap_or(0));
        let read = (&mut self.inner).take(extent.len).read_to_end(&mut data)?;

        if (read as u64) < extent.len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "expected {:#x} bytes at offset {:#x}, got {:#x}",
                    extent.len, extent.offset, read
                ),
            ));
        }

        Ok(data)
    }
}

/// Controls whether the directory entry located exactly at the directory end is read.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum DirectoryBoundary {
    /// Entries are read while their offset is strictly below the directory end.
    #[default]
    Exclusive,
    /// The entry located at the directory end is read as well.
    Inclusive,
}

impl DirectoryBoundary {
    fn admits(self, cursor: u64, extent: DirectoryExtent) -> bool {
        let cursor = cursor as i64;
        match self {
            DirectoryBoundary::Exclusive => cursor < extent.end,
            DirectoryBoundary::Inclusive => cursor <= extent.end,
        }
    }
}

/// The end offset of the tag directory.
///
/// The image has no separate field for it: the directory ends where the segment declared by its
/// first entry begins.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct DirectoryExtent {
    end: i64,
}

impl DirectoryExtent {
    pub fn from_first_entry(entry: &TagEntry) -> Self {
        Self {
            end: entry.offset.into(),
        }
    }

    #[inline]
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Returns the number of entries a [`DirectoryWalker`] with the given boundary yields.
    pub fn entry_count(&self, boundary: DirectoryBoundary) -> u64 {
        let start = DIRECTORY_START as i64;
        let stride = ENTRY_LEN as i64;
        let count = match boundary {
            DirectoryBoundary::Exclusive if self.end > start => {
                (self.end - start + stride - 1) / stride
            }
            DirectoryBoundary::Inclusive if self.end >= start => (self.end - start) / stride + 1,
            _ => 0,
        };
        count as u64
    }
}

/// Walks the tag directory one 16-byte entry at a time.
#[derive(Clone, Debug)]
pub struct DirectoryWalker {
    cursor: u64,
    extent: Option<DirectoryExtent>,
    boundary: DirectoryBoundary,
}

impl DirectoryWalker {
    pub fn new(boundary: DirectoryBoundary) -> Self {
        Self {
            cursor: DIRECTORY_START,
            extent: None,
            boundary,
        }
    }

    /// Returns the directory extent once the first entry has been read.
    pub fn extent(&self) -> Option<DirectoryExtent> {
        self.extent
    }

    /// Reads the next directory entry and advances the walker. Returns `None` when the cursor
    /// reaches the directory end.
    ///
    /// # Errors
    /// Returns [`FormatError::TruncatedDirectory`] if an entry to be read lies past the end of the
    /// image or a [`ReadError::Io`] if reading fails.
    pub fn next_entry<R: Read + Seek>(
        &mut self,
        container: &mut Container<R>,
    ) -> Result<Option<TagEntry>, ReadError> {
        if let Some(extent) = self.extent {
            if !self.boundary.admits(self.cursor, extent) {
                return Ok(None);
            }
        }

        let entry = container.read_entry(self.cursor)?;

        if self.extent.is_none() {
            let extent = DirectoryExtent::from_first_entry(&entry);
            debug!(
                "Tag directory ends at {:#x} ({} entries).",
                extent.end(),
                extent.entry_count(self.boundary)
            );

            self.extent = Some(extent);
            if !self.boundary.admits(self.cursor, extent) {
                return Ok(None);
            }
        }

        self.cursor += ENTRY_LEN as u64;

        Ok(Some(entry))
    }
}
