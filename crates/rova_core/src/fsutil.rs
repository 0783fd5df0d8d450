//! Filesystem helpers shared by the engine.
//!
//! All copies are chunked; whole-file reads are forbidden everywhere in
//! the engine because destination devices are RAM-limited.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// Copy `src` to `dst` in `chunk_size` reads, creating parent directories
/// of `dst` as needed.
pub fn copy_file_chunked(src: &Path, dst: &Path, chunk_size: usize) -> io::Result<u64> {
    ensure_parent_dir(dst)?;
    let mut reader = File::open(src)?;
    let mut writer = File::create(dst)?;
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut copied = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        copied += n as u64;
    }
    writer.flush()?;
    Ok(copied)
}

/// Create the parent directory of `path` if it has one.
pub fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Remove a directory tree; missing directories are not an error.
pub fn remove_dir_recursive(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Collect the relative POSIX paths of every regular file under `root`,
/// sorted. Unreadable subtrees are logged and skipped.
pub fn collect_relative_files(root: &Path) -> Vec<String> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "failed to walk directory");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            paths.push(to_posix(rel));
        }
    }
    paths.sort();
    paths
}

/// Render a relative path with `/` separators.
pub fn to_posix(path: &Path) -> String {
    let mut out = String::new();
    for component in path.components() {
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    out
}

/// Lowercased extension of a relative path, with leading dot, or an empty
/// string when the file name has none.
pub fn path_extension(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx..].to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Fraction of the filesystem holding `path` that is free, when the
/// platform can tell us.
#[cfg(unix)]
pub fn free_space_ratio(path: &Path) -> Option<f64> {
    let st = nix::sys::statvfs::statvfs(path).ok()?;
    let total = st.blocks() as f64;
    if total <= 0.0 {
        return None;
    }
    Some(st.blocks_available() as f64 / total)
}

#[cfg(not(unix))]
pub fn free_space_ratio(_path: &Path) -> Option<f64> {
    None
}
