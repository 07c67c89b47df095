//! Filesystem utilities.
//!
//! Crash-tolerant writes for the record files, plus the small helpers the
//! upload and maintenance paths share.
//!
//! A record file is always replaced whole: write a sibling temp file, fsync it,
//! then rename it over the destination. Rename-over-existing is not reliable on
//! every platform, so an existing destination is first moved aside as `.bak`.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

/// Write bytes to `path` using an atomic replace pattern.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = sibling_path(path, "tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    atomic_replace(path, &tmp_path)
}

/// Returns `<file name>.<suffix>` next to `path`.
pub fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut sibling = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "records".to_string());
    sibling.set_file_name(format!("{file_name}.{suffix}"));
    sibling
}

fn atomic_replace(dest: &Path, src_tmp: &Path) -> io::Result<()> {
    if !dest.exists() {
        return std::fs::rename(src_tmp, dest);
    }

    let bak = sibling_path(dest, "bak");
    if bak.exists() {
        let _ = std::fs::remove_file(&bak);
    }

    std::fs::rename(dest, &bak)?;
    match std::fs::rename(src_tmp, dest) {
        Ok(()) => {
            let _ = std::fs::remove_file(&bak);
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::rename(&bak, dest);
            let _ = std::fs::remove_file(src_tmp);
            Err(e)
        }
    }
}

/// Removes a file, logging instead of failing.
///
/// Returns whether the file was actually removed.
pub fn remove_file_best_effort(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) => {
            warn!("Could not remove file {}: {}", path.display(), e);
            false
        }
    }
}

/// Lower-cased extension of a file name, without the dot.
pub fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

/// Checks a file name's extension against an allow-list (case-insensitive).
pub fn has_allowed_extension(file_name: &str, allowed: &[&str]) -> bool {
    extension_of(file_name).is_some_and(|ext| allowed.contains(&ext.as_str()))
}

/// Final path component as a string, falling back to the input.
pub fn base_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_bytes_creates_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("videos.json");

        atomic_write_bytes(&path, b"one").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one");

        atomic_write_bytes(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");

        assert!(!sibling_path(&path, "tmp").exists());
        assert!(!sibling_path(&path, "bak").exists());
    }

    #[test]
    fn test_remove_file_best_effort_missing() {
        let dir = TempDir::new().unwrap();
        assert!(!remove_file_best_effort(&dir.path().join("missing.mp4")));
    }

    #[test]
    fn test_remove_file_best_effort_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"x").unwrap();
        assert!(remove_file_best_effort(&path));
        assert!(!path.exists());
    }

    #[test]
    fn test_has_allowed_extension() {
        let allowed = ["mp4", "mov"];
        assert!(has_allowed_extension("clip.MP4", &allowed));
        assert!(has_allowed_extension("dir/clip.mov", &allowed));
        assert!(!has_allowed_extension("clip.exe", &allowed));
        assert!(!has_allowed_extension("clip", &allowed));
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("faces/video_1_face_1.jpg"), "video_1_face_1.jpg");
        assert_eq!(base_name("plain.jpg"), "plain.jpg");
    }
}
