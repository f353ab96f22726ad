//! # Startup preparation.
//!
//! Deterministic, single-threaded steps run before any unit exists:
//! directory verification and the pid-file. Every failure here is a
//! [`StartupError`].

use std::fs;
use std::path::Path;

use crate::config::RequiredDir;
use crate::error::StartupError;

/// Checks that `dir` can be entered and listed.
pub fn verify_required_directory(dir: &RequiredDir) -> Result<(), StartupError> {
    fs::read_dir(&dir.path)
        .map(drop)
        .map_err(|source| StartupError::DirectoryInaccessible {
            name: dir.name.clone(),
            path: dir.path.clone(),
            source,
        })
}

/// Verifies every directory in order and returns the environment pairs to export to helpers.
pub fn verify_directories(dirs: &[RequiredDir]) -> Result<Vec<(String, String)>, StartupError> {
    dirs.iter()
        .map(|dir| {
            verify_required_directory(dir)?;
            Ok((dir.env.clone(), dir.path.display().to_string()))
        })
        .collect()
}

/// Writes the current process id followed by a newline.
pub fn write_pid_file(path: &Path) -> Result<(), StartupError> {
    fs::write(path, format!("{}\n", std::process::id())).map_err(|source| StartupError::PidFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Removes the pid-file if it exists.
///
/// `Ok(false)` means there was nothing to remove.
pub fn remove_pid_file(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
