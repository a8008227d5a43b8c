use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use encoding_rs::SHIFT_JIS;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zip::ZipArchive;

use crate::date;
use crate::error::{FixError, UnsafeReason};
use crate::ThrottledProgress;

const MAX_ENTRIES: usize = 200_000;
const MAX_ENTRY_UNCOMPRESSED_BYTES: u64 = 4 * 1024 * 1024 * 1024;
const MAX_TOTAL_UNCOMPRESSED_BYTES: u64 = 64 * 1024 * 1024 * 1024;
const MAX_COMPRESSION_RATIO: u64 = 200;
const RATIO_CHECK_MIN_BYTES: u64 = 64 * 1024 * 1024;

/// Caps applied to an untrusted archive before anything is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionLimits {
    pub max_entries: usize,
    pub max_entry_uncompressed_bytes: u64,
    pub max_total_uncompressed_bytes: u64,
    pub max_compression_ratio: u64,
    /// Entries smaller than this skip the ratio check
    pub ratio_check_min_bytes: u64,
}

impl ExtractionLimits {
    pub fn standard() -> Self {
        Self {
            max_entries: MAX_ENTRIES,
            max_entry_uncompressed_bytes: MAX_ENTRY_UNCOMPRESSED_BYTES,
            max_total_uncompressed_bytes: MAX_TOTAL_UNCOMPRESSED_BYTES,
            max_compression_ratio: MAX_COMPRESSION_RATIO,
            ratio_check_min_bytes: RATIO_CHECK_MIN_BYTES,
        }
    }
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self::standard()
    }
}

/// An entry that passed validation, ready to be written.
struct PlannedEntry {
    index: usize,
    name: String,
    dest: PathBuf,
    is_dir: bool,
}

/// Decode a raw entry name, trying UTF-8 first, then Shift_JIS
fn decode_entry_name(raw: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(raw) {
        return s.to_string();
    }

    // Common for Japanese ZIP files
    let (decoded, _, had_errors) = SHIFT_JIS.decode(raw);
    if !had_errors {
        return decoded.into_owned();
    }

    String::from_utf8_lossy(raw).into_owned()
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Map an entry name onto `root`, refusing anything that would land outside it.
///
/// `root` must already be canonical. Backslashes count as separators so that
/// Windows-built archives cannot smuggle `..\` past the check.
pub fn resolve_entry_path(root: &Path, name: &str) -> Result<PathBuf, UnsafeReason> {
    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') || has_drive_prefix(&normalized) || Path::new(name).is_absolute() {
        return Err(UnsafeReason::AbsolutePath);
    }

    let mut parts: Vec<&str> = Vec::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                if parts.pop().is_none() {
                    return Err(UnsafeReason::PathTraversal);
                }
            }
            p => parts.push(p),
        }
    }

    let mut dest = root.to_path_buf();
    dest.extend(parts);
    if !dest.starts_with(root) {
        return Err(UnsafeReason::PathTraversal);
    }
    Ok(dest)
}

/// Check every entry against the limits and the extraction root.
/// Nothing touches the disk here.
fn validate_entries<R: io::Read + io::Seek>(
    archive: &mut ZipArchive<R>,
    root: &Path,
    limits: &ExtractionLimits,
) -> Result<Vec<PlannedEntry>, FixError> {
    let entry_count = archive.len();
    if entry_count > limits.max_entries {
        return Err(FixError::unsafe_entry(
            &format!("{entry_count} entries"),
            UnsafeReason::TooManyEntries,
        ));
    }

    let mut plan = Vec::with_capacity(entry_count);
    let mut total_uncompressed: u64 = 0;
    for index in 0..entry_count {
        let entry = archive.by_index_raw(index)?;
        let name = decode_entry_name(entry.name_raw());

        let dest = resolve_entry_path(root, &name)
            .map_err(|reason| FixError::unsafe_entry(&name, reason))?;

        let uncompressed = entry.size();
        if uncompressed > limits.max_entry_uncompressed_bytes {
            return Err(FixError::unsafe_entry(&name, UnsafeReason::EntryTooLarge));
        }
        if uncompressed > 0 && uncompressed >= limits.ratio_check_min_bytes {
            let ratio_cap = entry.compressed_size().saturating_mul(limits.max_compression_ratio);
            if uncompressed > ratio_cap {
                return Err(FixError::unsafe_entry(&name, UnsafeReason::CompressionRatio));
            }
        }
        total_uncompressed = total_uncompressed.saturating_add(uncompressed);
        if total_uncompressed > limits.max_total_uncompressed_bytes {
            return Err(FixError::unsafe_entry(&name, UnsafeReason::TotalTooLarge));
        }

        let is_dir = entry.is_dir() || name.ends_with('/') || name.ends_with('\\');
        if dest == root {
            continue;
        }
        plan.push(PlannedEntry {
            index,
            name,
            dest,
            is_dir,
        });
    }
    Ok(plan)
}

/// Copy one entry body, enforcing the size limits on the bytes actually read.
///
/// `already_written` is the running total of earlier entries. Headers can
/// understate sizes, so validation alone is not enough.
fn copy_entry<R: Read, W: Write>(
    reader: R,
    writer: &mut W,
    name: &str,
    already_written: u64,
    limits: &ExtractionLimits,
) -> Result<u64, FixError> {
    let total_left = limits.max_total_uncompressed_bytes.saturating_sub(already_written);
    let cap = limits.max_entry_uncompressed_bytes.min(total_left);
    let copied = io::copy(&mut reader.take(cap.saturating_add(1)), writer)
        .map_err(|e| FixError::CorruptArchive(format!("{name}: {e}")))?;
    if copied > limits.max_entry_uncompressed_bytes {
        return Err(FixError::unsafe_entry(name, UnsafeReason::EntryTooLarge));
    }
    if copied > total_left {
        return Err(FixError::unsafe_entry(name, UnsafeReason::TotalTooLarge));
    }
    Ok(copied)
}

/// Validate, then extract, an untrusted zip archive into `dest_dir`.
///
/// Returns the number of files written. Extraction starts only after every
/// entry has passed validation.
pub fn extract_archive(
    archive_path: &Path,
    dest_dir: &Path,
    limits: &ExtractionLimits,
    progress: &ThrottledProgress,
) -> Result<usize, FixError> {
    let file = File::open(archive_path).map_err(|e| FixError::io(archive_path, e))?;
    let mut archive = ZipArchive::new(file)?;

    fs::create_dir_all(dest_dir).map_err(|e| FixError::io(dest_dir, e))?;
    let root = dest_dir.canonicalize().map_err(|e| FixError::io(dest_dir, e))?;

    let plan = validate_entries(&mut archive, &root, limits)?;
    let total = plan.len() as u64;

    let mut written = 0;
    let mut written_bytes: u64 = 0;
    for (i, planned) in plan.iter().enumerate() {
        progress.report("extract", i as u64, total, "Extracting archive");
        if planned.is_dir {
            fs::create_dir_all(&planned.dest).map_err(|e| FixError::io(&planned.dest, e))?;
            continue;
        }
        if let Some(parent) = planned.dest.parent() {
            fs::create_dir_all(parent).map_err(|e| FixError::io(parent, e))?;
        }

        let mut entry = archive.by_index(planned.index)?;
        let modified: Option<zip::DateTime> = entry.last_modified().into();
        let mut out = File::create(&planned.dest).map_err(|e| FixError::io(&planned.dest, e))?;
        written_bytes += copy_entry(&mut entry, &mut out, &planned.name, written_bytes, limits)?;
        drop(out);

        if let Some(epoch) = modified.and_then(zip_time_to_epoch) {
            let ft = filetime::FileTime::from_unix_time(epoch, 0);
            if let Err(e) = filetime::set_file_times(&planned.dest, ft, ft) {
                debug!("could not set mtime on {}: {e}", planned.dest.display());
            }
        }
        written += 1;
    }
    progress.report("extract", total, total, "Archive extracted");

    Ok(written)
}

/// Zip timestamps are local wall-clock time.
fn zip_time_to_epoch(dt: zip::DateTime) -> Option<i64> {
    let naive = chrono::NaiveDate::from_ymd_opt(dt.year() as i32, dt.month() as u32, dt.day() as u32)?
        .and_hms_opt(dt.hour() as u32, dt.minute() as u32, dt.second() as u32)?;
    date::local_to_epoch(naive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn count_files(dir: &Path) -> usize {
        walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }

    #[test]
    fn test_resolve_entry_path() {
        let root = Path::new("/work/extract");
        assert_eq!(
            resolve_entry_path(root, "Takeout/a.jpg").unwrap(),
            PathBuf::from("/work/extract/Takeout/a.jpg")
        );
        assert_eq!(
            resolve_entry_path(root, "a/../b.jpg").unwrap(),
            PathBuf::from("/work/extract/b.jpg")
        );
        assert_eq!(
            resolve_entry_path(root, "../../etc/passerby.jpg"),
            Err(UnsafeReason::PathTraversal)
        );
        assert_eq!(
            resolve_entry_path(root, "a/../../b.jpg"),
            Err(UnsafeReason::PathTraversal)
        );
        assert_eq!(
            resolve_entry_path(root, "..\\..\\evil.jpg"),
            Err(UnsafeReason::PathTraversal)
        );
        assert_eq!(
            resolve_entry_path(root, "/etc/passwd"),
            Err(UnsafeReason::AbsolutePath)
        );
        assert_eq!(
            resolve_entry_path(root, "C:\\Windows\\x.jpg"),
            Err(UnsafeReason::AbsolutePath)
        );
    }

    #[test]
    fn test_decode_shift_jis_name() {
        let (raw, _, _) = SHIFT_JIS.encode("写真.jpg");
        assert_eq!(decode_entry_name(&raw), "写真.jpg");
        assert_eq!(decode_entry_name(b"plain.jpg"), "plain.jpg");
    }

    #[test]
    fn test_extract_writes_entries() {
        let temp = tempdir().unwrap();
        let zip_path = temp.path().join("in.zip");
        write_zip(
            &zip_path,
            &[
                ("Takeout/Photos/a.jpg", &b"aaa"[..]),
                ("Takeout/Photos/a.jpg.json", &b"{}"[..]),
            ],
        );
        let out = temp.path().join("out");
        let written = extract_archive(&zip_path, &out, &ExtractionLimits::standard(), &ThrottledProgress::silent()).unwrap();
        assert_eq!(written, 2);
        assert_eq!(fs::read(out.join("Takeout/Photos/a.jpg")).unwrap(), b"aaa");
    }

    #[test]
    fn test_traversal_rejected_before_any_write() {
        let temp = tempdir().unwrap();
        let zip_path = temp.path().join("evil.zip");
        // The safe entry comes first: it must not be written either.
        write_zip(
            &zip_path,
            &[
                ("good.jpg", &b"fine"[..]),
                ("../../etc/passerby.jpg", &b"evil"[..]),
            ],
        );
        let out = temp.path().join("out");
        let err = extract_archive(&zip_path, &out, &ExtractionLimits::standard(), &ThrottledProgress::silent())
            .unwrap_err();
        match err {
            FixError::UnsafeArchiveEntry { entry, reason } => {
                assert_eq!(entry, "../../etc/passerby.jpg");
                assert_eq!(reason, UnsafeReason::PathTraversal);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(count_files(&out), 0);
        assert!(!temp.path().join("etc").exists());
    }

    #[test]
    fn test_absolute_entry_rejected() {
        let temp = tempdir().unwrap();
        let zip_path = temp.path().join("abs.zip");
        write_zip(&zip_path, &[("/tmp/owned.jpg", &b"evil"[..])]);
        let out = temp.path().join("out");
        let err = extract_archive(&zip_path, &out, &ExtractionLimits::standard(), &ThrottledProgress::silent())
            .unwrap_err();
        assert!(matches!(
            err,
            FixError::UnsafeArchiveEntry {
                reason: UnsafeReason::AbsolutePath,
                ..
            }
        ));
        assert_eq!(count_files(&out), 0);
    }

    #[test]
    fn test_corrupt_archive() {
        let temp = tempdir().unwrap();
        let zip_path = temp.path().join("broken.zip");
        fs::write(&zip_path, b"this is not a zip file").unwrap();
        let err = extract_archive(
            &zip_path,
            &temp.path().join("out"),
            &ExtractionLimits::standard(),
            &ThrottledProgress::silent(),
        )
        .unwrap_err();
        assert!(matches!(err, FixError::CorruptArchive(_)));
    }

    #[test]
    fn test_entry_size_limit() {
        let temp = tempdir().unwrap();
        let zip_path = temp.path().join("big.zip");
        write_zip(&zip_path, &[("big.jpg", &[1u8; 64][..])]);
        let limits = ExtractionLimits {
            max_entry_uncompressed_bytes: 16,
            ..ExtractionLimits::standard()
        };
        let err = extract_archive(&zip_path, &temp.path().join("out"), &limits, &ThrottledProgress::silent())
            .unwrap_err();
        assert!(matches!(
            err,
            FixError::UnsafeArchiveEntry {
                reason: UnsafeReason::EntryTooLarge,
                ..
            }
        ));
    }

    #[test]
    fn test_compression_ratio_limit() {
        let temp = tempdir().unwrap();
        let zip_path = temp.path().join("bomb.zip");
        let data = vec![b'a'; 4096];
        write_zip(&zip_path, &[("dense.jpg", data.as_slice())]);
        let limits = ExtractionLimits {
            max_compression_ratio: 2,
            ratio_check_min_bytes: 0,
            ..ExtractionLimits::standard()
        };
        let err = extract_archive(&zip_path, &temp.path().join("out"), &limits, &ThrottledProgress::silent())
            .unwrap_err();
        assert!(err.to_string().contains("compression ratio"));
    }

    #[test]
    fn test_small_compressible_entry_extracts() {
        let temp = tempdir().unwrap();
        let zip_path = temp.path().join("flat.zip");
        // A blank 1080p bitmap deflates far past the ratio cap
        let pixels = vec![0u8; 1920 * 1080 * 3];
        write_zip(&zip_path, &[("Export/IMG_20200101_101010.bmp", pixels.as_slice())]);
        let out = temp.path().join("out");
        let written = extract_archive(&zip_path, &out, &ExtractionLimits::standard(), &ThrottledProgress::silent()).unwrap();
        assert_eq!(written, 1);
        assert_eq!(
            fs::metadata(out.join("Export/IMG_20200101_101010.bmp")).unwrap().len(),
            pixels.len() as u64
        );
    }

    #[test]
    fn test_copy_entry_counts_actual_bytes() {
        let limits = ExtractionLimits {
            max_entry_uncompressed_bytes: 16,
            max_total_uncompressed_bytes: 40,
            ..ExtractionLimits::standard()
        };

        let mut sink = Vec::new();
        assert_eq!(copy_entry(&[7u8; 16][..], &mut sink, "fits.jpg", 0, &limits).unwrap(), 16);
        assert_eq!(sink.len(), 16);

        let mut sink = Vec::new();
        let err = copy_entry(&[7u8; 1000][..], &mut sink, "liar.jpg", 0, &limits).unwrap_err();
        assert!(matches!(
            err,
            FixError::UnsafeArchiveEntry {
                reason: UnsafeReason::EntryTooLarge,
                ..
            }
        ));
        assert!(sink.len() <= 17);

        let mut sink = Vec::new();
        let err = copy_entry(&[7u8; 16][..], &mut sink, "last.jpg", 30, &limits).unwrap_err();
        assert!(matches!(
            err,
            FixError::UnsafeArchiveEntry {
                reason: UnsafeReason::TotalTooLarge,
                ..
            }
        ));
    }
}
