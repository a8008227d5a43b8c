use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Container formats accepted as media, keyed by lowercase extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Jpeg,
    Png,
    Heif,
    Gif,
    Bmp,
    Webp,
}

impl MediaKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(MediaKind::Jpeg),
            "png" => Some(MediaKind::Png),
            "heic" | "heif" => Some(MediaKind::Heif),
            "gif" => Some(MediaKind::Gif),
            "bmp" => Some(MediaKind::Bmp),
            "webp" => Some(MediaKind::Webp),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Only JPEG receives an embedded timestamp; everything else gets file times only.
    pub fn supports_exif_write(self) -> bool {
        matches!(self, MediaKind::Jpeg)
    }
}

/// How a file's timestamp was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Fixed,
    RestoredFromFilename,
    RenamedOnly,
    Skipped,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Fixed => "fixed",
            Classification::RestoredFromFilename => "restored_from_filename",
            Classification::RenamedOnly => "renamed_only",
            Classification::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaFile {
    /// Absolute path inside the extraction root
    pub path: PathBuf,
    /// Path relative to the extraction root, `/`-separated
    pub relative: String,
    /// Just the filename
    pub filename: String,
    pub kind: MediaKind,
    /// File size in bytes
    pub size: u64,
    /// SHA-256 hash hex (None unless the size is shared with another file)
    pub hash: Option<String>,
    /// Resolved capture time, epoch seconds
    pub timestamp: Option<i64>,
    pub classification: Option<Classification>,
    pub is_messaging_app: bool,
    /// EXIF orientation value seen in embedded XMP, if any
    pub orientation: Option<u16>,
}

impl MediaFile {
    pub fn new(path: PathBuf, relative: String, kind: MediaKind, size: u64) -> Self {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&relative)
            .to_string();
        Self {
            path,
            relative,
            filename,
            kind,
            size,
            hash: None,
            timestamp: None,
            classification: None,
            is_messaging_app: false,
            orientation: None,
        }
    }

    /// Lowercase extension used for output names
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_from_extension() {
        assert_eq!(MediaKind::from_extension("JPG"), Some(MediaKind::Jpeg));
        assert_eq!(MediaKind::from_extension("jpeg"), Some(MediaKind::Jpeg));
        assert_eq!(MediaKind::from_extension("HEIC"), Some(MediaKind::Heif));
        assert_eq!(MediaKind::from_extension("webp"), Some(MediaKind::Webp));
        assert_eq!(MediaKind::from_extension("json"), None);
        assert_eq!(MediaKind::from_extension("mp4"), None);
    }

    #[test]
    fn test_only_jpeg_takes_exif() {
        assert!(MediaKind::Jpeg.supports_exif_write());
        assert!(!MediaKind::Png.supports_exif_write());
        assert!(!MediaKind::Heif.supports_exif_write());
    }

    #[test]
    fn test_extension_is_lowercased() {
        let m = MediaFile::new(
            PathBuf::from("/x/IMG_1.JPG"),
            "IMG_1.JPG".into(),
            MediaKind::Jpeg,
            3,
        );
        assert_eq!(m.extension(), "jpg");
        assert_eq!(m.filename, "IMG_1.JPG");
    }
}
