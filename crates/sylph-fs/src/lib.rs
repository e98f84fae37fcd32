//! Filesystem helpers for persisted container files.
//!
//! Container files are written in two regions (a reserved header region followed by the data
//! region). This crate provides:
//! - atomic replacement of a whole container file from its regions (temp file in the same
//!   directory, flush + `sync_all`, rename with replace semantics)
//! - in-place overwrite of a byte range of an existing file, used when only the reserved header
//!   region changes

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

fn parent_dir_or_dot(path: &Path) -> &Path {
    // `Path::parent` returns `Some("")` for bare relative file names like `out.sydata`.
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Atomically replace `dest` with the concatenation of `regions`.
///
/// If any write fails the destination file is left untouched and the temp file is removed.
pub fn persist_regions(dest: impl AsRef<Path>, regions: &[&[u8]]) -> io::Result<()> {
    let dest = dest.as_ref();
    let dir = parent_dir_or_dot(dest);
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    for region in regions {
        tmp.as_file_mut().write_all(region)?;
    }
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;

    let tmp_path = tmp.into_temp_path();
    replace_file(tmp_path.as_ref(), dest)?;

    // Best-effort: the file is already in place.
    let _ = sync_parent_dir(dest);
    Ok(())
}

/// Overwrite `bytes` at `offset` inside an existing file without touching anything else.
///
/// Fails with [`io::ErrorKind::NotFound`] when the file does not exist; it never creates one.
pub fn overwrite_at(path: impl AsRef<Path>, offset: u64, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path.as_ref())?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()
}

/// Resolve `path` to an absolute path without requiring it to exist.
///
/// Existing files are canonicalized so two spellings of the same file compare equal; missing
/// files are resolved against their (canonicalized) parent directory.
pub fn absolute_path(path: impl AsRef<Path>) -> io::Result<PathBuf> {
    let path = path.as_ref();
    if let Ok(canonical) = fs::canonicalize(path) {
        return Ok(canonical);
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => match fs::canonicalize(parent) {
            Ok(parent) => Ok(parent.join(name)),
            Err(_) => Ok(absolute),
        },
        _ => Ok(absolute),
    }
}

fn sync_parent_dir(path: &Path) -> io::Result<()> {
    let parent = parent_dir_or_dot(path);
    // Opening a directory as a file is not supported everywhere; callers treat this as
    // best-effort.
    let dir = File::open(parent)?;
    dir.sync_all()
}

fn replace_file(from: &Path, to: &Path) -> io::Result<()> {
    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt as _;
        use windows_sys::Win32::Storage::FileSystem::{MoveFileExW, MOVEFILE_REPLACE_EXISTING};

        fn to_wide_null(path: &Path) -> Vec<u16> {
            let mut wide: Vec<u16> = path.as_os_str().encode_wide().collect();
            wide.push(0);
            wide
        }

        let from_w = to_wide_null(from);
        let to_w = to_wide_null(to);
        let ok = unsafe { MoveFileExW(from_w.as_ptr(), to_w.as_ptr(), MOVEFILE_REPLACE_EXISTING) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(windows))]
    {
        fs::rename(from, to)
    }
}
