use crate::error::{FileOpError, UnpackError};
use dialoguer::Confirm;
use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::Path,
};

fn create_file_impl(
    name: &'static str,
    path: &Path,
    overwrite: bool,
    silent: bool,
) -> Result<File, Box<FileOpError>> {
    let map_error = |error| FileOpError::make_create(name, path.to_path_buf(), error);
    let result = OpenOptions::new()
        .write(true)
        .create_new(!overwrite)
        .create(overwrite)
        .truncate(overwrite)
        .open(path)
        .map_err(map_error);

    let Err(error) = result else {
        return result;
    };

    // Ask before clobbering an existing artifact unless asked to stay quiet.
    if !overwrite && !silent && error.is_exists() && path.is_file() {
        let response = Confirm::new()
            .with_prompt(format!(
                "Do you want to overwrite the file at '{}'?",
                path.display()
            ))
            .default(false)
            .interact()
            .map_err(map_error)?;

        if response {
            return OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .map_err(map_error);
        }
    }

    Err(error)
}

/// Creates a file at the specified path.
///
/// In case the `overwrite` argument is `true`, the file will be either created or truncated if it
/// exists, otherwise in case `silent` is `false` the user will be asked if overwriting the file is
/// ok, otherwise an error will be returned.
///
/// # Errors
/// This function will return a boxed `FileOpError` with the `FileOpAction::Create` action in case
/// an I/O error occurs while creating the file or prompting the user.
pub fn create_file<P: AsRef<Path>>(
    name: &'static str,
    path: P,
    overwrite: bool,
    silent: bool,
) -> Result<File, Box<FileOpError>> {
    create_file_impl(name, path.as_ref(), overwrite, silent)
}

/// Creates a file at the specified path and writes data from a slice into it.
///
/// File creation is handled by [`create_file`], see it for the meaning of `overwrite` and
/// `silent`.
pub fn save_file<P: AsRef<Path>>(
    name: &'static str,
    path: P,
    data: &[u8],
    overwrite: bool,
    silent: bool,
) -> Result<(), Box<FileOpError>> {
    let path = path.as_ref();

    create_file(name, path, overwrite, silent)?
        .write_all(data)
        .map_err(|error| FileOpError::make_write(name, path.to_path_buf(), error))?;

    info!("Saved {} to {}.", name, path.display());

    Ok(())
}

/// Creates the output directory along with its parents. An existing directory is fine.
pub fn create_out_dir(path: &Path) -> Result<(), UnpackError<'_>> {
    if path.exists() && !path.is_dir() {
        return Err(UnpackError::OutDirIsNotDir(path));
    }

    fs::create_dir_all(path).map_err(|e| UnpackError::FailedToCreateOutDir(path, e))
}
