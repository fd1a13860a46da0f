//! File-system side effects: destination checks, moves and body mapping

use crate::response::ResponseBody;
use memmap2::Mmap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Check that `path` can receive a download: not a directory, and its
/// parent is an existing, writable directory.
pub fn validate_destination(path: &Path) -> io::Result<()> {
    let raw = path.as_os_str().to_string_lossy();
    if raw.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "destination is empty"));
    }
    if raw.ends_with(std::path::MAIN_SEPARATOR) || raw.ends_with('/') || path.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "destination is a directory",
        ));
    }

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let metadata = fs::metadata(&parent)?;
    if !metadata.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "destination parent is not a directory",
        ));
    }
    // Permission bits say nothing about ownership; only a real write answers it
    tempfile::tempfile_in(&parent).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("destination parent is not writable: {}", e),
        )
    })?;
    Ok(())
}

/// Replace whatever is at `destination` with the file at `source`
pub fn replace_item(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::remove_file(destination) {
        Ok(()) => debug!("Removed existing file at {}", destination.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    if let Err(e) = fs::rename(source, destination) {
        // Renames cannot cross file systems; copy instead and leave the
        // source for its owner to delete
        debug!(
            "Rename {} -> {} failed ({}), copying instead",
            source.display(),
            destination.display(),
            e
        );
        fs::copy(source, destination)?;
    }
    Ok(())
}

/// Map the file at `path` into memory as a read-only body
pub fn map_file(path: &Path) -> io::Result<ResponseBody> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(ResponseBody::empty());
    }
    // SAFETY: the engine and this module are the only writers of download
    // files, and neither touches a file after it has been handed out mapped.
    let map = unsafe { Mmap::map(&file)? };
    Ok(ResponseBody::mapped(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_in_existing_directory_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_destination(&dir.path().join("out.bin")).is_ok());
    }

    #[test]
    fn test_directory_destination_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_destination(dir.path()).is_err());

        let trailing = format!("{}/", dir.path().join("sub").display());
        assert!(validate_destination(Path::new(&trailing)).is_err());
    }

    #[test]
    fn test_missing_parent_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.bin");
        assert!(validate_destination(&path).is_err());
    }

    #[test]
    fn test_file_parent_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"x").unwrap();
        assert!(validate_destination(&file.join("out.bin")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_unwritable_parent_is_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        // Privileged users write anywhere; the check must agree with a real write
        let writable = fs::write(locked.join("canary"), b"x").is_ok();
        let result = validate_destination(&locked.join("out.bin"));
        assert_eq!(result.is_ok(), writable);
        if !writable {
            assert_eq!(result.unwrap_err().kind(), io::ErrorKind::PermissionDenied);
        }

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_validation_leaves_no_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        validate_destination(&dir.path().join("out.bin")).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_replace_item_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        let destination = dir.path().join("destination");
        fs::write(&source, b"new").unwrap();
        fs::write(&destination, b"old contents").unwrap();

        replace_item(&source, &destination).unwrap();
        assert_eq!(fs::read(&destination).unwrap(), b"new");
        assert!(!source.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_mapped_body_survives_unlink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body");
        fs::write(&path, b"mapped bytes").unwrap();

        let body = map_file(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert!(body.is_mapped());
        assert_eq!(body, &b"mapped bytes"[..]);
    }

    #[test]
    fn test_empty_file_maps_to_empty_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        fs::write(&path, b"").unwrap();
        assert!(map_file(&path).unwrap().is_empty());
    }
}
