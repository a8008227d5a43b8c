use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Why an archive entry was refused before extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsafeReason {
    AbsolutePath,
    PathTraversal,
    TooManyEntries,
    EntryTooLarge,
    TotalTooLarge,
    CompressionRatio,
}

impl fmt::Display for UnsafeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            UnsafeReason::AbsolutePath => "absolute path",
            UnsafeReason::PathTraversal => "path traversal outside the extraction root",
            UnsafeReason::TooManyEntries => "archive has too many entries",
            UnsafeReason::EntryTooLarge => "entry exceeds the uncompressed size limit",
            UnsafeReason::TotalTooLarge => "archive exceeds the total uncompressed size limit",
            UnsafeReason::CompressionRatio => "entry exceeds the compression ratio limit",
        };
        f.write_str(text)
    }
}

/// Errors that abort a whole run.
#[derive(Error, Debug)]
pub enum FixError {
    #[error("Invalid or corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("Unsafe archive entry '{entry}': {reason}")]
    UnsafeArchiveEntry { entry: String, reason: UnsafeReason },

    #[error("Could not detect export type. Expected a Google Takeout or Apple Photos export")]
    UnknownExportLayout,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid configuration in {}: {reason}", path.display())]
    InvalidConfig { path: PathBuf, reason: String },

    #[error("I/O error at {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl FixError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        FixError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn unsafe_entry(entry: &str, reason: UnsafeReason) -> Self {
        FixError::UnsafeArchiveEntry {
            entry: entry.to_string(),
            reason,
        }
    }
}

impl From<zip::result::ZipError> for FixError {
    fn from(err: zip::result::ZipError) -> Self {
        FixError::CorruptArchive(err.to_string())
    }
}

/// Per-file failures. Counted in the run statistics, never returned to the caller.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("Metadata write failed for {}: {reason}", path.display())]
    MetadataWrite { path: PathBuf, reason: String },

    #[error("I/O error at {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl FileError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        FileError::Io {
            path: path.into(),
            source,
        }
    }
}
