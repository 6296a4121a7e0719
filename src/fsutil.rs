//! Filesystem helpers shared by the local sender, receiver, and restorer.
//!
//! All durable writes in this crate follow the same pattern the teacher uses
//! for its own checkpoint file: write to a temp file under the configured
//! temp directory, `fsync`, then atomically rename into place. This keeps a
//! partially-written `part-<id>.bin` from ever being observable under its
//! final name.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Creates a file with restrictive permissions where supported, failing if
/// it already exists. Used when installing a brand-new partition file: the
/// restorer asserts no partition file currently exists before writing one.
///
/// # Errors
/// Returns an error if the file already exists or cannot be created.
pub fn create_new_secure(path: &Path) -> io::Result<File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        OpenOptions::new().write(true).create_new(true).mode(0o600).open(path)
    }
    #[cfg(not(unix))]
    {
        OpenOptions::new().write(true).create_new(true).open(path)
    }
}

/// Opens a file for read/write without truncation, creating it if missing.
///
/// # Errors
/// Returns an error if the file cannot be opened.
pub fn open_rw_no_trunc(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)
}

/// Allocates a temp file path under `temp_dir` for staging a partial write
/// before it is renamed to `final_name`.
#[must_use]
pub fn temp_path_for(temp_dir: &Path, final_name: &str) -> PathBuf {
    let unique = uuid::Uuid::new_v4();
    temp_dir.join(format!("{final_name}.{unique}.part"))
}

/// Writes `bytes` to a temp file under `temp_dir`, fsyncs it, then atomically
/// renames it to `dest`. `dest`'s parent directory is created if missing.
///
/// # Errors
/// Returns an error if any of the write, fsync, or rename steps fail.
pub fn write_atomic(temp_dir: &Path, dest: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::create_dir_all(temp_dir)?;
    let final_name = dest.file_name().and_then(|n| n.to_str()).unwrap_or("artifact");
    let tmp = temp_path_for(temp_dir, final_name);
    {
        let mut f = File::create(&tmp)?;
        use std::io::Write;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, dest)?;
    sync_parent_dir(dest)
}

/// Atomically installs a file that was staged at `staged` into `dest`,
/// asserting `dest` does not already exist. Used by the restorer when
/// bringing a freshly-received partition file online.
///
/// # Errors
/// Returns an error if `dest` already exists or the rename fails.
pub fn install_new_file(staged: &Path, dest: &Path) -> io::Result<()> {
    if dest.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("refusing to overwrite existing partition file at {}", dest.display()),
        ));
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(staged, dest)?;
    sync_parent_dir(dest)
}

/// Best-effort directory fsync so the rename itself survives a crash. A
/// no-op on platforms without directory fsync support (e.g. Windows).
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_produces_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("part-0.bin");
        write_atomic(dir.path(), &dest, b"hello").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"hello");
    }

    #[test]
    fn install_new_file_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("part-0.bin");
        fs::write(&dest, b"existing").unwrap();
        let staged = dir.path().join("staged.tmp");
        fs::write(&staged, b"new").unwrap();
        let err = install_new_file(&staged, &dest).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn install_new_file_moves_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("sub").join("part-0.bin");
        let staged = dir.path().join("staged.tmp");
        fs::write(&staged, b"new").unwrap();
        install_new_file(&staged, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"new");
        assert!(!staged.exists());
    }
}
