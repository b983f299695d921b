use crate::parser::ReadError;
use std::{
    error::Error,
    fmt, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// What was being done to a file when an I/O error happened.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum FileOpAction {
    /// Creating an artifact in the output directory.
    Create,
    /// Opening the firmware image.
    Open,
    /// Writing the contents of an artifact.
    Write,
}

impl FileOpAction {
    fn verb(self) -> &'static str {
        match self {
            FileOpAction::Create => "create",
            FileOpAction::Open => "open",
            FileOpAction::Write => "write",
        }
    }
}

/// An I/O error tied to the image or artifact it happened on.
#[derive(Debug)]
pub struct FileOpError {
    pub action: FileOpAction,
    /// The kind of file, e.g. "firmware", "ticket" or "segment".
    pub name: &'static str,
    pub path: PathBuf,
    pub error: io::Error,
}

impl FileOpError {
    fn boxed(
        action: FileOpAction,
        name: &'static str,
        path: PathBuf,
        error: io::Error,
    ) -> Box<Self> {
        Box::new(Self {
            action,
            name,
            path,
            error,
        })
    }

    pub fn make_create(name: &'static str, path: PathBuf, error: io::Error) -> Box<Self> {
        Self::boxed(FileOpAction::Create, name, path, error)
    }

    pub fn make_open(name: &'static str, path: PathBuf, error: io::Error) -> Box<Self> {
        Self::boxed(FileOpAction::Open, name, path, error)
    }

    pub fn make_write(name: &'static str, path: PathBuf, error: io::Error) -> Box<Self> {
        Self::boxed(FileOpAction::Write, name, path, error)
    }

    /// Returns `true` if an artifact couldn't be created because one is already there.
    pub fn is_exists(&self) -> bool {
        self.error.kind() == io::ErrorKind::AlreadyExists
    }
}

impl fmt::Display for FileOpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "couldn't {} {} file {}: {}",
            self.action.verb(),
            self.name,
            self.path.display(),
            self.error
        )
    }
}

impl Error for FileOpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

/// Everything that can stop an extraction run. Each one ends the process with status 1.
#[derive(Debug, Error)]
pub enum UnpackError<'a> {
    #[error("{0}")]
    FileOp(#[from] Box<FileOpError>),
    /// The output path is taken by something that isn't a directory.
    #[error("output path {} is not a directory", .0.display())]
    OutDirIsNotDir(&'a Path),
    #[error("couldn't create output directory {}: {}", .0.display(), .1)]
    FailedToCreateOutDir(&'a Path, #[source] io::Error),
    /// The image failed validation, declared a range outside itself or couldn't be read.
    #[error("firmware image {}: {}", .0.display(), .1)]
    Read(&'a Path, #[source] ReadError),
    #[error("couldn't serialize the manifest: {0}")]
    ManifestSerialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::FormatError;

    #[test]
    fn file_errors_name_the_file() {
        let error = FileOpError::make_create(
            "segment",
            PathBuf::from("extracted/kbag"),
            io::ErrorKind::AlreadyExists.into(),
        );

        assert!(error.is_exists());
        assert!(error
            .to_string()
            .starts_with("couldn't create segment file extracted/kbag: "));
    }

    #[test]
    fn image_errors_name_the_image() {
        let error = UnpackError::Read(
            Path::new("fw.bin"),
            FormatError::UnknownMagic(*b"RKOSFTAB").into(),
        );

        assert_eq!(
            error.to_string(),
            "firmware image fw.bin: firmware is invalid (magic value is RKOSFTAB)"
        );
    }
}
