use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDateTime};
use filetime::FileTime;

use crate::date::epoch_to_local;
use crate::error::FileError;
use crate::media::Classification;

/// Bucket for files whose capture time could not be recovered
pub const NEEDS_REVIEW_DIR: &str = "Needs_Review";

const NAME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// `YYYY-MM-DD_HH-MM-SS[_WA][_FN]`, without counter or extension.
pub fn base_name(local: NaiveDateTime, is_messaging_app: bool, classification: Classification) -> String {
    let mut name = local.format(NAME_FORMAT).to_string();
    if is_messaging_app {
        name.push_str("_WA");
    }
    if classification == Classification::RestoredFromFilename {
        name.push_str("_FN");
    }
    name
}

fn with_extension(stem: &str, ext: &str) -> String {
    if ext.is_empty() {
        stem.to_string()
    } else {
        format!("{stem}.{ext}")
    }
}

/// Assigns collision-free destination paths under one output root.
///
/// Assignment is sequential: the n-th file to claim a name gets `_NNN`
/// with NNN = n - 1, so results follow the order files are offered.
#[derive(Debug)]
pub struct OutputOrganizer {
    root: PathBuf,
    /// Last counter handed out per base destination
    name_counters: HashMap<PathBuf, u32>,
    used_paths: HashSet<PathBuf>,
    created_dirs: HashSet<PathBuf>,
}

impl OutputOrganizer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            name_counters: HashMap::new(),
            used_paths: HashSet::new(),
            created_dirs: HashSet::new(),
        }
    }

    /// Destination for a file with a resolved timestamp: `<root>/<year>/<name>`.
    pub fn assign_dated(
        &mut self,
        timestamp: i64,
        is_messaging_app: bool,
        classification: Classification,
        ext: &str,
    ) -> Result<PathBuf, FileError> {
        let local = epoch_to_local(timestamp).ok_or_else(|| FileError::MetadataWrite {
            path: self.root.clone(),
            reason: format!("timestamp {timestamp} is out of range"),
        })?;
        let dir = self.root.join(format!("{:04}", local.year()));
        let stem = base_name(local, is_messaging_app, classification);
        self.allocate(&dir, &stem, ext)
    }

    /// Destination for an unresolved file: `<root>/Needs_Review/<original name>`.
    pub fn assign_review(&mut self, original_name: &str) -> Result<PathBuf, FileError> {
        let dir = self.root.join(NEEDS_REVIEW_DIR);
        let path = Path::new(original_name);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(original_name);
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        self.allocate(&dir, stem, ext)
    }

    fn allocate(&mut self, dir: &Path, stem: &str, ext: &str) -> Result<PathBuf, FileError> {
        if !self.created_dirs.contains(dir) {
            fs::create_dir_all(dir).map_err(|e| FileError::io(dir, e))?;
            self.created_dirs.insert(dir.to_path_buf());
        }

        let base_dest = dir.join(with_extension(stem, ext));
        let counter = self.name_counters.entry(base_dest.clone()).or_insert(0);

        let dest = if *counter == 0 && !self.used_paths.contains(&base_dest) && !base_dest.exists() {
            base_dest
        } else {
            // Resume from the last counter instead of re-probing used numbers
            loop {
                *counter += 1;
                let candidate = dir.join(with_extension(&format!("{stem}_{:03}", *counter), ext));
                if !self.used_paths.contains(&candidate) && !candidate.exists() {
                    break candidate;
                }
            }
        };

        self.used_paths.insert(dest.clone());
        Ok(dest)
    }
}

/// Copy `src` to `dest`. With `keep_mtime` the source's modification time
/// is carried over; otherwise the caller is expected to stamp the copy.
pub fn copy_file(src: &Path, dest: &Path, keep_mtime: bool) -> Result<(), FileError> {
    fs::copy(src, dest).map_err(|e| FileError::io(dest, e))?;
    if keep_mtime {
        let metadata = fs::metadata(src).map_err(|e| FileError::io(src, e))?;
        let mtime = FileTime::from_last_modification_time(&metadata);
        filetime::set_file_times(dest, mtime, mtime).map_err(|e| FileError::io(dest, e))?;
    }
    Ok(())
}
