use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::Path;

use chrono::{Datelike, Timelike};
use filetime::FileTime;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::date::epoch_to_local;
use crate::error::FixError;
use crate::ThrottledProgress;

/// Local wall-clock DOS time for an epoch, or the zip epoch when out of range.
fn zip_time(epoch: i64) -> zip::DateTime {
    epoch_to_local(epoch)
        .and_then(|local| {
            zip::DateTime::from_date_and_time(
                u16::try_from(local.year()).ok()?,
                local.month() as u8,
                local.day() as u8,
                local.hour() as u8,
                local.minute() as u8,
                local.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}

/// Zip the tree under `root` into `dest`.
///
/// Entries are added in sorted walk order with `/` separators and carry the
/// file's modification time, so the same tree always yields the same bytes.
pub fn package_output(root: &Path, dest: &Path, progress: &ThrottledProgress) -> Result<usize, FixError> {
    let files: Vec<_> = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .collect();
    let total = files.len() as u64;

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| FixError::io(parent, e))?;
    }
    let out = File::create(dest).map_err(|e| FixError::io(dest, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(out));

    for (i, entry) in files.iter().enumerate() {
        progress.report("package", i as u64, total, "Packaging output");
        let path = entry.path();
        let name = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        let metadata = entry.metadata().map_err(|e| FixError::io(path, e.into()))?;
        let mtime = FileTime::from_last_modification_time(&metadata).unix_seconds();
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip_time(mtime))
            .unix_permissions(0o644);

        zip.start_file(name.as_str(), options)
            .map_err(|e| FixError::io(dest, io::Error::other(e)))?;
        let mut src = File::open(path).map_err(|e| FixError::io(path, e))?;
        io::copy(&mut src, &mut zip).map_err(|e| FixError::io(path, e))?;
    }

    let mut writer = zip
        .finish()
        .map_err(|e| FixError::io(dest, io::Error::other(e)))?;
    io::Write::flush(&mut writer).map_err(|e| FixError::io(dest, e))?;
    progress.report("package", total, total, "Output packaged");
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    fn build_tree(root: &Path) {
        fs::create_dir_all(root.join("2021")).unwrap();
        fs::create_dir_all(root.join("Needs_Review")).unwrap();
        fs::write(root.join("2021/2021-01-01_10-00-00.jpg"), b"jpeg").unwrap();
        fs::write(root.join("Needs_Review/scan.png"), b"png").unwrap();
        fs::write(root.join("duplicates_report.txt"), b"Duplicates removed: 1\n").unwrap();
        for rel in [
            "2021/2021-01-01_10-00-00.jpg",
            "Needs_Review/scan.png",
            "duplicates_report.txt",
        ] {
            let ft = FileTime::from_unix_time(1_600_000_000, 0);
            filetime::set_file_mtime(root.join(rel), ft).unwrap();
        }
    }

    #[test]
    fn test_package_lists_sorted_entries() {
        let tree = tempdir().unwrap();
        build_tree(tree.path());
        let out = tempdir().unwrap();
        let dest = out.path().join("fixed.zip");

        let count = package_output(tree.path(), &dest, &ThrottledProgress::silent()).unwrap();
        assert_eq!(count, 3);

        let mut archive = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "2021/2021-01-01_10-00-00.jpg",
                "Needs_Review/scan.png",
                "duplicates_report.txt",
            ]
        );
        let mut body = String::new();
        archive
            .by_name("Needs_Review/scan.png")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "png");
    }

    #[test]
    fn test_package_is_deterministic() {
        let tree = tempdir().unwrap();
        build_tree(tree.path());
        let out = tempdir().unwrap();
        let a = out.path().join("a.zip");
        let b = out.path().join("b.zip");
        package_output(tree.path(), &a, &ThrottledProgress::silent()).unwrap();
        package_output(tree.path(), &b, &ThrottledProgress::silent()).unwrap();
        assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
    }
}
