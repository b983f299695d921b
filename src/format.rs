//! On-disk layout of 'rkosftab' firmware images.

use std::fmt;

/// The signature stored at [`MAGIC_OFFSET`].
pub const MAGIC: [u8; 8] = *b"rkosftab";

pub const MAGIC_OFFSET: u64 = 0x20;

/// Length of the fixed header. The tag directory starts right after it.
pub const HEADER_LEN: usize = 0x30;
pub const DIRECTORY_START: u64 = HEADER_LEN as u64;
pub const ENTRY_LEN: usize = 16;

/// Name of the artifact the ticket blob is saved to.
pub const TICKET_NAME: &str = "ticket";

/// A 4-byte segment identifier.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Tag(pub [u8; 4]);

impl Tag {
    /// Returns `true` if the tag can be used as a file name as is.
    pub fn is_filename_safe(&self) -> bool {
        self.0
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-')
    }

    /// Returns the name of the artifact this tag is saved to. Tags containing anything other
    /// than ASCII alphanumerics, `_` or `-` are hex encoded.
    pub fn file_name(&self) -> String {
        if self.is_filename_safe() {
            String::from_utf8_lossy(&self.0).into_owned()
        } else {
            hex::encode(self.0)
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.escape_ascii())
    }
}

/// The fixed 48-byte header of an image.
#[derive(Clone, Debug)]
pub struct Header {
    pub unk_0: u32,
    pub unk_1: u32,
    pub unk_2: u32,
    pub unk_3: u32,
    pub ticket_offset: i32,
    pub ticket_size: i32,
    pub unk_4: u32,
    pub unk_5: u32,
    pub magic: [u8; 8],
    /// Declared segment count. Extraction walks the directory by its extent instead.
    pub segments_count: u32,
    pub unk_6: u32,
}

/// A 16-byte tag directory record.
#[derive(Clone, Debug)]
pub struct TagEntry {
    pub tag: Tag,
    pub offset: i32,
    pub size: i32,
    pub reserved: u32,
}
