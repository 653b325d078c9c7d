//! Per-run scratch directory and file naming.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use rand::Rng;
use tempfile::TempDir;

use crate::error::{RegistrationError, Result};

/// Length of the random stem used when a file has no readable name.
pub const RANDOM_STEM_LENGTH: usize = 10;

/// A fresh directory owned by one registration run.
///
/// Names are `<YYYYmmdd_HHMMSS>_<stem><ext>` with spaces replaced by
/// underscores. A name is never handed out twice by the same directory.
pub struct RunDirectory {
    dir: TempDir,
    timestamp: String,
    allocated: HashSet<String>,
}

impl RunDirectory {
    /// Create a unique directory under `root`, or under the system temp dir.
    pub fn create(root: Option<&Path>, started: DateTime<Local>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("niftyreg_");
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| RegistrationError::io(root, e))?;
                builder.tempdir_in(root).map_err(|e| RegistrationError::io(root, e))?
            }
            None => builder
                .tempdir()
                .map_err(|e| RegistrationError::io(std::env::temp_dir(), e))?,
        };

        Ok(Self {
            dir,
            timestamp: started.format("%Y%m%d_%H%M%S").to_string(),
            allocated: HashSet::new(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Reserve a path for `stem` (random when `None`) with extension `ext`.
    pub fn allocate(&mut self, stem: Option<&str>, ext: &str) -> PathBuf {
        let base = match stem {
            Some(stem) => stem.replace(' ', "_"),
            None => random_stem(RANDOM_STEM_LENGTH),
        };

        let mut file_name = format!("{}_{}{}", self.timestamp, base, ext);
        let mut attempt = 1;
        while self.allocated.contains(&file_name) {
            attempt += 1;
            file_name = match stem {
                Some(_) => format!("{}_{}_{}{}", self.timestamp, base, attempt, ext),
                None => format!("{}_{}{}", self.timestamp, random_stem(RANDOM_STEM_LENGTH), ext),
            };
        }

        self.allocated.insert(file_name.clone());
        self.dir.path().join(file_name)
    }

    /// Stop the directory from being deleted and return its path.
    pub fn keep(self) -> PathBuf {
        self.dir.keep()
    }
}

/// Random string of lowercase ASCII letters.
pub fn random_stem(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| rng.gen_range(b'a'..=b'z') as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn started() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn test_named_paths() {
        let mut run = RunDirectory::create(None, started()).unwrap();
        let path = run.allocate(Some("t1 brain_on_ct"), ".nii");
        assert_eq!(path.parent().unwrap(), run.path());
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "20240309_140507_t1_brain_on_ct.nii"
        );
    }

    #[test]
    fn test_random_stem() {
        let mut run = RunDirectory::create(None, started()).unwrap();
        let name = run
            .allocate(None, ".txt")
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        let stem = name
            .strip_prefix("20240309_140507_")
            .and_then(|s| s.strip_suffix(".txt"))
            .unwrap();
        assert_eq!(stem.len(), RANDOM_STEM_LENGTH);
        assert!(stem.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn test_no_name_is_reused() {
        let mut run = RunDirectory::create(None, started()).unwrap();
        let first = run.allocate(Some("ct"), ".nii");
        let second = run.allocate(Some("ct"), ".nii");
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("ct_2.nii"));
    }

    #[test]
    fn test_each_run_gets_its_own_directory() {
        let root = TempDir::new().unwrap();
        let a = RunDirectory::create(Some(root.path()), started()).unwrap();
        let b = RunDirectory::create(Some(root.path()), started()).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(root.path()));

        let kept = a.keep();
        assert!(kept.is_dir());
        drop(b);
        assert!(kept.is_dir());
    }
}
