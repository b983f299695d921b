//! Provides the [`Unpacker`] that extracts the ticket and all tagged segments of an image into a
//! directory.

use crate::{
    error::{FileOpError, UnpackError},
    format::*,
    manifest::{Manifest, SegmentDesc, TicketDesc},
    parser::{Container, DirectoryBoundary, DirectoryWalker, ReadError},
    util,
};
use std::{
    fs::File,
    io::{BufReader, Read, Seek},
    path::{Path, PathBuf},
};

/// Name of the manifest written next to the artifacts.
pub const MANIFEST_NAME: &str = "manifest.toml";

/// What to do when an artifact already exists in the output directory.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum Overwrite {
    #[default]
    Always,
    /// Ask the user for every existing artifact.
    Ask,
    Never,
}

impl Overwrite {
    /// Returns the `overwrite` and `silent` flags for [`util::save_file`].
    fn flags(self) -> (bool, bool) {
        match self {
            Overwrite::Always => (true, true),
            Overwrite::Ask => (false, false),
            Overwrite::Never => (false, true),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Options {
    pub out_dir: PathBuf,
    pub overwrite: Overwrite,
    pub boundary: DirectoryBoundary,
    pub print_header: bool,
    pub write_manifest: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("extracted"),
            overwrite: Overwrite::default(),
            boundary: DirectoryBoundary::default(),
            print_header: false,
            write_manifest: false,
        }
    }
}

/// Counts of what an [`Unpacker`] has written.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Summary {
    pub ticket_len: Option<u64>,
    pub segments: usize,
    pub bytes: u64,
}

/// An image whose header has been validated and which is ready to be extracted.
pub struct Unpacker<'a, R> {
    path: &'a Path,
    container: Container<R>,
    header: Header,
}

impl<'a> Unpacker<'a, BufReader<File>> {
    /// Opens the image at `path` and validates its header.
    pub fn open(path: &'a Path) -> Result<Self, UnpackError<'a>> {
        let file = File::open(path)
            .map_err(|error| FileOpError::make_open("firmware", path.to_path_buf(), error))?;

        info!("Loaded file at path {}.", path.display());

        Self::new(path, BufReader::new(file))
    }
}

impl<'a, R: Read + Seek> Unpacker<'a, R> {
    /// Validates the header of an image read from `reader`. `path` is only used in error
    /// messages.
    pub fn new(path: &'a Path, reader: R) -> Result<Self, UnpackError<'a>> {
        let mut container =
            Container::new(reader).map_err(|e| UnpackError::Read(path, ReadError::Io(e)))?;
        let header = container
            .read_header()
            .map_err(|e| UnpackError::Read(path, e))?;

        Ok(Self {
            path,
            container,
            header,
        })
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Creates the output directory and writes the ticket and every segment of the directory into
    /// it. Artifacts written before a failure are left in place.
    pub fn unpack<'b>(&mut self, options: &'b Options) -> Result<Summary, UnpackError<'b>>
    where
        'a: 'b,
    {
        let path: &'b Path = self.path;
        let read_error = |e: ReadError| UnpackError::Read(path, e);
        let (overwrite, silent) = options.overwrite.flags();
        let out_dir = options.out_dir.as_path();

        util::create_out_dir(out_dir)?;

        info!("Extracting firmware blobs to {}.", out_dir.display());

        let mut manifest = Manifest::with_header(&self.header);
        let mut summary = Summary::default();

        let ticket = self
            .container
            .ticket(&self.header)
            .map_err(|e| read_error(e.into()))?;
        if let Some(extent) = ticket {
            let data = self
                .container
                .read_extent(extent)
                .map_err(|e| read_error(e.into()))?;
            util::save_file("ticket", out_dir.join(TICKET_NAME), &data, overwrite, silent)?;

            manifest.ticket = Some(TicketDesc {
                path: TICKET_NAME.into(),
                offset: extent.offset,
                size: extent.len,
            });
            summary.ticket_len = Some(extent.len);
            summary.bytes += extent.len;
        }

        let mut walker = DirectoryWalker::new(options.boundary);
        while let Some(entry) = walker.next_entry(&mut self.container).map_err(read_error)? {
            info!(
                "Tag:{} Offset:{:#x} Size:{:#x}",
                entry.tag, entry.offset, entry.size
            );

            let name = entry.tag.file_name();
            if !entry.tag.is_filename_safe() {
                warn!("Tag {} is saved as {}.", entry.tag, name);
            }

            let extent = self
                .container
                .checked_extent(&format!("segment {}", entry.tag), entry.offset, entry.size)
                .map_err(|e| read_error(e.into()))?;
            let data = self
                .container
                .read_extent(extent)
                .map_err(|e| read_error(e.into()))?;
            util::save_file("segment", out_dir.join(&name), &data, overwrite, silent)?;

            manifest.segments.push(SegmentDesc {
                path: name.into(),
                tag: entry.tag,
                offset: extent.offset,
                size: extent.len,
                unk: entry.reserved,
            });
            summary.segments += 1;
            summary.bytes += extent.len;
        }

        manifest.directory_end = walker.extent().map_or(0, |extent| extent.end());

        if options.write_manifest {
            let text = manifest.to_toml()?;
            util::save_file(
                "manifest",
                out_dir.join(MANIFEST_NAME),
                text.as_bytes(),
                overwrite,
                silent,
            )?;
        }

        Ok(summary)
    }
}

fn print_header(header: &Header) {
    println!("unk_0: {:#010x}", header.unk_0);
    println!("unk_1: {:#010x}", header.unk_1);
    println!("unk_2: {:#010x}", header.unk_2);
    println!("unk_3: {:#010x}", header.unk_3);
    println!("ticket_offset: {:#x}", header.ticket_offset);
    println!("ticket_size: {:#x}", header.ticket_size);
    println!("unk_4: {:#010x}", header.unk_4);
    println!("unk_5: {:#010x}", header.unk_5);
    println!("magic: {}", header.magic.escape_ascii());
    println!("segments_count: {}", header.segments_count);
    println!("unk_6: {:#010x}", header.unk_6);
}

/// Validates the image at `path` and extracts it. Nothing is written if validation fails.
pub fn run<'a>(path: &'a Path, options: &'a Options) -> Result<Summary, UnpackError<'a>> {
    let mut unpacker = Unpacker::open(path)?;

    if options.print_header {
        print_header(unpacker.header());
    }

    unpacker.unpack(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        parser::{FormatError, RangeViolation},
        testutil::{ImageBuilder, TempDir},
    };
    use std::{fs, io::Cursor};

    fn options(dir: &TempDir) -> Options {
        Options {
            out_dir: dir.path().join("extracted"),
            ..Options::default()
        }
    }

    #[test]
    fn extracts_single_tag_image() {
        let mut image = vec![0u8; 80];
        image[32..40].copy_from_slice(b"rkosftab");
        image[48..52].copy_from_slice(b"kbag");
        image[52..56].copy_from_slice(&64i32.to_le_bytes());
        image[56..60].copy_from_slice(&16i32.to_le_bytes());
        for (i, b) in image[64..].iter_mut().enumerate() {
            *b = 0xc0 + i as u8;
        }

        let dir = TempDir::new();
        let path = dir.write_image(&image);
        let options = options(&dir);

        let summary = run(&path, &options).unwrap();
        assert_eq!(summary.segments, 1);
        assert_eq!(summary.ticket_len, None);

        let entries: Vec<_> = fs::read_dir(&options.out_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, ["kbag"]);
        assert_eq!(
            fs::read(options.out_dir.join("kbag")).unwrap(),
            &image[64..80]
        );
    }

    #[test]
    fn reproduces_every_segment_and_the_ticket() {
        let segments: [([u8; 4], Vec<u8>); 3] = [
            (*b"rkos", (0..37).collect()),
            (*b"rrko", vec![0x5a; 3]),
            (*b"bbfw", (0..=255).rev().collect()),
        ];
        let ticket = b"0\x82\x01\x00ticket body".to_vec();

        let mut builder = ImageBuilder::new().ticket(&ticket);
        for (tag, data) in segments.iter() {
            builder = builder.segment(*tag, data);
        }
        let image = builder.build();

        let dir = TempDir::new();
        let path = dir.write_image(&image);
        let options = options(&dir);

        let summary = run(&path, &options).unwrap();
        assert_eq!(summary.segments, 3);
        assert_eq!(summary.ticket_len, Some(ticket.len() as u64));

        for (tag, data) in segments.iter() {
            let name = std::str::from_utf8(tag).unwrap();
            assert_eq!(&fs::read(options.out_dir.join(name)).unwrap(), data);
        }
        assert_eq!(fs::read(options.out_dir.join(TICKET_NAME)).unwrap(), ticket);
        assert!(!options.out_dir.join(MANIFEST_NAME).exists());
    }

    #[test]
    fn invalid_magic_creates_nothing() {
        let mut image = ImageBuilder::new().segment(*b"kbag", &[1; 16]).build();
        image[32..40].copy_from_slice(b"RKOSFTAB");

        let dir = TempDir::new();
        let path = dir.write_image(&image);
        let options = options(&dir);

        let err = run(&path, &options).unwrap_err();
        assert!(matches!(
            err,
            UnpackError::Read(_, ReadError::Format(FormatError::UnknownMagic(_)))
        ));
        assert!(!options.out_dir.exists());
    }

    #[test]
    fn missing_image_is_a_file_error() {
        let dir = TempDir::new();
        let path = dir.path().join("missing.bin");
        let options = options(&dir);

        assert!(matches!(run(&path, &options), Err(UnpackError::FileOp(_))));
        assert!(!options.out_dir.exists());
    }

    #[test]
    fn out_of_bounds_segment_aborts_without_partial_artifact() {
        let mut image = ImageBuilder::new()
            .segment(*b"rkos", &[1; 8])
            .segment(*b"rrko", &[2; 8])
            .build();
        // Stretch the second segment past the end of the file.
        image[64 + 8..64 + 12].copy_from_slice(&9i32.to_le_bytes());

        let dir = TempDir::new();
        let path = dir.write_image(&image);
        let options = options(&dir);

        let err = run(&path, &options).unwrap_err();
        match err {
            UnpackError::Read(_, ReadError::Range(e)) => {
                assert_eq!(e.violation, RangeViolation::PastEnd);
                assert_eq!(e.size, 9);
            }
            e => panic!("unexpected error: {e}"),
        }

        assert_eq!(fs::read(options.out_dir.join("rkos")).unwrap(), [1; 8]);
        assert!(!options.out_dir.join("rrko").exists());
    }

    #[test]
    fn unsafe_tags_are_saved_hex_encoded() {
        let image = ImageBuilder::new().segment(*b"a/..", &[7; 4]).build();

        let dir = TempDir::new();
        let path = dir.write_image(&image);
        let options = options(&dir);

        run(&path, &options).unwrap();
        assert_eq!(fs::read(options.out_dir.join("612f2e2e")).unwrap(), [7; 4]);
    }

    #[test]
    fn writes_manifest_on_request() {
        let image = ImageBuilder::new()
            .ticket(&[9; 4])
            .segment(*b"kbag", &[1; 16])
            .build();

        let dir = TempDir::new();
        let path = dir.write_image(&image);
        let options = Options {
            write_manifest: true,
            ..options(&dir)
        };

        run(&path, &options).unwrap();

        let text = fs::read_to_string(options.out_dir.join(MANIFEST_NAME)).unwrap();
        let value: toml::Value = toml::from_str(&text).unwrap();
        assert_eq!(value["directory_end"].as_integer(), Some(64));
        assert_eq!(value["segments"][0]["tag"].as_str(), Some("kbag"));
        assert_eq!(value["ticket"]["size"].as_integer(), Some(4));
    }

    #[test]
    fn rerun_overwrites_by_default_and_fails_when_told_not_to() {
        let image = ImageBuilder::new().segment(*b"kbag", &[1; 16]).build();

        let dir = TempDir::new();
        let path = dir.write_image(&image);
        let options = options(&dir);

        run(&path, &options).unwrap();
        run(&path, &options).unwrap();

        let options = Options {
            overwrite: Overwrite::Never,
            ..options
        };
        match run(&path, &options) {
            Err(UnpackError::FileOp(e)) => assert!(e.is_exists()),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn unpacks_from_memory() {
        let image = ImageBuilder::new()
            .segment(*b"rkos", &[1; 4])
            .segment(*b"rrko", &[2; 4])
            .build();

        let dir = TempDir::new();
        let options = options(&dir);
        let path = Path::new("memory");

        let mut unpacker = Unpacker::new(path, Cursor::new(image)).unwrap();
        assert_eq!(unpacker.header().segments_count, 2);

        let summary = unpacker.unpack(&options).unwrap();
        assert_eq!(
            summary,
            Summary {
                ticket_len: None,
                segments: 2,
                bytes: 8,
            }
        );
    }
}
