//! Helpers for building synthetic images and scratch directories in tests.

use crate::format::*;
use std::{
    env, fs,
    path::{Path, PathBuf},
    process,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Lays out a well-formed image: header, tag directory, 4-byte aligned segment data and finally
/// the ticket.
#[derive(Default, Clone, Debug)]
pub struct ImageBuilder {
    segments: Vec<(Tag, Vec<u8>)>,
    ticket: Option<Vec<u8>>,
    unknowns: [u32; 7],
    segments_count: Option<u32>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unknowns(mut self, unknowns: [u32; 7]) -> Self {
        self.unknowns = unknowns;
        self
    }

    pub fn segments_count(mut self, count: u32) -> Self {
        self.segments_count = Some(count);
        self
    }

    pub fn ticket(mut self, data: &[u8]) -> Self {
        self.ticket = Some(data.to_vec());
        self
    }

    pub fn segment(mut self, tag: [u8; 4], data: &[u8]) -> Self {
        self.segments.push((Tag(tag), data.to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let directory_end = HEADER_LEN + self.segments.len() * ENTRY_LEN;
        let mut directory = Vec::new();
        let mut data = Vec::new();

        for (tag, segment) in self.segments.iter() {
            let padding = (4 - data.len() % 4) % 4;
            data.resize(data.len() + padding, 0);

            let offset = (directory_end + data.len()) as i32;
            directory.extend_from_slice(&tag.0);
            directory.extend_from_slice(&offset.to_le_bytes());
            directory.extend_from_slice(&(segment.len() as i32).to_le_bytes());
            directory.extend_from_slice(&0u32.to_le_bytes());
            data.extend_from_slice(segment);
        }

        let (ticket_offset, ticket_size) = match self.ticket.as_ref() {
            Some(ticket) => ((directory_end + data.len()) as i32, ticket.len() as i32),
            None => (0, 0),
        };

        let [unk_0, unk_1, unk_2, unk_3, unk_4, unk_5, unk_6] = self.unknowns;
        let segments_count = self
            .segments_count
            .unwrap_or(self.segments.len() as u32);

        let mut image = Vec::new();
        for field in [unk_0, unk_1, unk_2, unk_3] {
            image.extend_from_slice(&field.to_le_bytes());
        }
        image.extend_from_slice(&ticket_offset.to_le_bytes());
        image.extend_from_slice(&ticket_size.to_le_bytes());
        image.extend_from_slice(&unk_4.to_le_bytes());
        image.extend_from_slice(&unk_5.to_le_bytes());
        image.extend_from_slice(&MAGIC);
        image.extend_from_slice(&segments_count.to_le_bytes());
        image.extend_from_slice(&unk_6.to_le_bytes());
        image.extend_from_slice(&directory);
        image.extend_from_slice(&data);

        if let Some(ticket) = self.ticket.as_deref() {
            image.extend_from_slice(ticket);
        }

        image
    }
}

/// A scratch directory under the system temporary directory, removed on drop.
pub struct TempDir(PathBuf);

impl TempDir {
    pub fn new() -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        let path = env::temp_dir().join(format!(
            "rkosdump-test-{}-{}",
            process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).unwrap();

        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Writes an image into the directory and returns its path.
    pub fn write_image(&self, image: &[u8]) -> PathBuf {
        let path = self.0.join("firmware.bin");
        fs::write(&path, image).unwrap();
        path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}
