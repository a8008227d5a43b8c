use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::media::{MediaFile, MediaKind};

/// Folder macOS adds to archives built in Finder
const MACOS_RESOURCE_DIR: &str = "__MACOSX";
/// Prefix of AppleDouble resource-fork files
const APPLE_DOUBLE_PREFIX: &str = "._";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportLayout {
    GoogleTakeout,
    ApplePhotos,
    Unknown,
}

impl ExportLayout {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportLayout::GoogleTakeout => "google_takeout",
            ExportLayout::ApplePhotos => "apple_photos",
            ExportLayout::Unknown => "unknown",
        }
    }
}

/// Archive artifacts that are never part of the export
pub fn is_ignored(name: &str) -> bool {
    name == MACOS_RESOURCE_DIR || name.starts_with(APPLE_DOUBLE_PREFIX)
}

fn keep_entry(entry: &DirEntry) -> bool {
    entry.depth() == 0 || !entry.file_name().to_str().is_some_and(is_ignored)
}

/// Files under `root` in stable, lexicographic walk order.
fn walk_files(root: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(keep_entry)
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!("skipping unreadable entry: {err}");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Classify an extracted export: JSON sidecars plus media means Takeout,
/// media alone means Apple Photos.
pub fn classify(root: &Path) -> ExportLayout {
    let mut has_json = false;
    let mut has_media = false;

    for entry in walk_files(root) {
        let path = entry.path();
        has_json |= is_json(path);
        has_media |= MediaKind::from_path(path).is_some();
        if has_json && has_media {
            return ExportLayout::GoogleTakeout;
        }
    }

    if has_media {
        ExportLayout::ApplePhotos
    } else {
        ExportLayout::Unknown
    }
}

/// Every supported media file under `root`, in walk order.
pub fn collect_media(root: &Path) -> Vec<MediaFile> {
    walk_files(root)
        .filter_map(|entry| {
            let kind = MediaKind::from_path(entry.path())?;
            let size = match entry.metadata() {
                Ok(m) => m.len(),
                Err(e) => {
                    debug!("cannot stat {}: {e}", entry.path().display());
                    return None;
                }
            };
            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            Some(MediaFile::new(entry.into_path(), relative, kind, size))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel.as_bytes()).unwrap();
    }

    #[test]
    fn test_classify_takeout() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Takeout/Google Photos/Photos from 2020/a.jpg");
        touch(dir.path(), "Takeout/Google Photos/Photos from 2020/a.jpg.json");
        assert_eq!(classify(dir.path()), ExportLayout::GoogleTakeout);
    }

    #[test]
    fn test_classify_apple() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Export/IMG_0001.HEIC");
        touch(dir.path(), "Export/notes.txt");
        assert_eq!(classify(dir.path()), ExportLayout::ApplePhotos);
    }

    #[test]
    fn test_classify_unknown() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "docs/readme.txt");
        touch(dir.path(), "docs/meta.json");
        assert_eq!(classify(dir.path()), ExportLayout::Unknown);
    }

    #[test]
    fn test_macos_artifacts_ignored() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "__MACOSX/Export/._IMG_0001.jpg");
        touch(dir.path(), "Export/._IMG_0002.jpg");
        touch(dir.path(), "Export/readme.txt");
        assert_eq!(classify(dir.path()), ExportLayout::Unknown);
        assert!(collect_media(dir.path()).is_empty());
    }

    #[test]
    fn test_collect_media_walk_order() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "b/2.jpg");
        touch(dir.path(), "a/z.png");
        touch(dir.path(), "a/y.JPG");
        touch(dir.path(), "a/y.JPG.json");
        touch(dir.path(), "c.webp");
        let media = collect_media(dir.path());
        let names: Vec<&str> = media.iter().map(|m| m.relative.as_str()).collect();
        assert_eq!(names, ["a/y.JPG", "a/z.png", "b/2.jpg", "c.webp"]);
        assert_eq!(media[0].size, "a/y.JPG".len() as u64);
    }
}
