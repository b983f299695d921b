//! A TOML description of an extracted image.

use crate::format::{Header, Tag};
use serde::{Serialize, Serializer};
use std::path::PathBuf;

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Tags saved under their own name are written as strings, the rest as integers.
        match std::str::from_utf8(&self.0) {
            Ok(s) if self.is_filename_safe() => serializer.serialize_str(s),
            _ => serializer.serialize_u32(u32::from_be_bytes(self.0)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TicketDesc {
    pub path: PathBuf,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct SegmentDesc {
    pub path: PathBuf,
    pub tag: Tag,
    pub offset: u64,
    pub size: u64,
    pub unk: u32,
}

#[derive(Debug, Serialize)]
pub struct Manifest {
    pub unk_0: u32,
    pub unk_1: u32,
    pub unk_2: u32,
    pub unk_3: u32,
    pub unk_4: u32,
    pub unk_5: u32,
    pub unk_6: u32,
    pub segments_count: u32,
    pub directory_end: i64,
    pub segments: Vec<SegmentDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<TicketDesc>,
}

impl Manifest {
    pub fn with_header(header: &Header) -> Manifest {
        Manifest {
            unk_0: header.unk_0,
            unk_1: header.unk_1,
            unk_2: header.unk_2,
            unk_3: header.unk_3,
            unk_4: header.unk_4,
            unk_5: header.unk_5,
            unk_6: header.unk_6,
            segments_count: header.segments_count,
            directory_end: 0,
            segments: Vec::new(),
            ticket: None,
        }
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
