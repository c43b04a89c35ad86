//! Size-based rotation for append-only JSON Lines files
//!
//! Shared by the diagnostic logger and the audit trail. Rotated siblings use
//! numeric suffixes `.1`..`.N`; the highest number is the oldest.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// An append-only file that rotates once it reaches `max_bytes`
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    max_files: usize,
    /// Serializes rotate + append so concurrent writers never interleave
    write_lock: Mutex<()>,
}

impl RotatingFile {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64, max_files: usize) -> Self {
        Self {
            path: path.into(),
            max_bytes,
            max_files: max_files.max(1),
            write_lock: Mutex::new(()),
        }
    }

    /// Active file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the `n`th rotated sibling (`audit.log` -> `audit.log.n`)
    pub fn rotated_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{}", n));
        self.path.with_file_name(name)
    }

    /// Append one line, rotating first when the active file is at or over the
    /// threshold. A failed rotation is reported on the console and the append
    /// still goes ahead against whatever file is active.
    pub fn append_line(&self, line: &str) -> io::Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Err(e) = self.rotate_if_needed() {
            super::console::report(&format!(
                "opgate: failed to rotate {}: {}",
                self.path.display(),
                e
            ));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Rotate when the active file size is at or above the threshold.
    /// Returns whether a rotation happened.
    fn rotate_if_needed(&self) -> io::Result<bool> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };

        if size < self.max_bytes {
            return Ok(false);
        }

        let oldest = self.rotated_path(self.max_files);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }

        for n in (1..self.max_files).rev() {
            let from = self.rotated_path(n);
            if from.exists() {
                fs::rename(&from, self.rotated_path(n + 1))?;
            }
        }

        fs::rename(&self.path, self.rotated_path(1))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_rotated_path_suffix() {
        let file = RotatingFile::new("/var/log/opgate/audit.log", 10, 3);
        assert_eq!(file.rotated_path(1), PathBuf::from("/var/log/opgate/audit.log.1"));
        assert_eq!(file.rotated_path(3), PathBuf::from("/var/log/opgate/audit.log.3"));
    }

    #[test]
    fn test_no_rotation_below_threshold() {
        let dir = tempdir().unwrap();
        let file = RotatingFile::new(dir.path().join("a.log"), 1024, 3);

        file.append_line("one").unwrap();
        file.append_line("two").unwrap();

        assert!(!file.rotated_path(1).exists());
        assert_eq!(fs::read_to_string(file.path()).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_rotation_moves_full_file_to_first_sibling() {
        let dir = tempdir().unwrap();
        let file = RotatingFile::new(dir.path().join("a.log"), 8, 3);

        // 9 bytes, at or above threshold
        file.append_line("12345678").unwrap();
        file.append_line("next").unwrap();

        assert_eq!(fs::read_to_string(file.rotated_path(1)).unwrap(), "12345678\n");
        assert_eq!(fs::read_to_string(file.path()).unwrap(), "next\n");
    }

    #[test]
    fn test_rotation_shifts_and_drops_oldest() {
        let dir = tempdir().unwrap();
        let file = RotatingFile::new(dir.path().join("a.log"), 1, 2);

        // Every append after the first rotates
        file.append_line("first").unwrap();
        file.append_line("second").unwrap();
        file.append_line("third").unwrap();
        file.append_line("fourth").unwrap();

        assert_eq!(fs::read_to_string(file.path()).unwrap(), "fourth\n");
        assert_eq!(fs::read_to_string(file.rotated_path(1)).unwrap(), "third\n");
        assert_eq!(fs::read_to_string(file.rotated_path(2)).unwrap(), "second\n");
        assert!(!file.rotated_path(3).exists());
    }
}
