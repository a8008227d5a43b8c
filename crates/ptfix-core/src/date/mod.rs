pub mod exif;
pub mod guess;
pub mod json;
pub mod xmp;

use std::fs;
use std::path::Path;

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta};
use tracing::debug;

use crate::layout::ExportLayout;
use crate::media::Classification;
use crate::RunConfig;

/// Where a resolved timestamp came from, in trust order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    Sidecar,
    Exif,
    Xmp,
    MessagingAppName,
    Filename,
    Mtime,
}

impl DateSource {
    pub fn classification(self) -> Classification {
        match self {
            DateSource::Sidecar | DateSource::Exif | DateSource::Xmp | DateSource::Mtime => {
                Classification::Fixed
            }
            DateSource::MessagingAppName | DateSource::Filename => {
                Classification::RestoredFromFilename
            }
        }
    }
}

/// A resolved timestamp (epoch seconds) and its source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub timestamp: i64,
    pub source: DateSource,
}

#[derive(Debug, Clone, Default)]
pub struct ResolveOutcome {
    pub resolution: Option<Resolution>,
    /// Orientation found in embedded XMP while scanning, kept for the writer
    pub orientation: Option<u16>,
}

impl ResolveOutcome {
    pub fn classification(&self, config: &RunConfig) -> Classification {
        match &self.resolution {
            Some(r) => r.source.classification(),
            None if config.skip_no_metadata => Classification::Skipped,
            None => Classification::RenamedOnly,
        }
    }

    pub fn is_messaging_app(&self) -> bool {
        matches!(
            self.resolution,
            Some(Resolution {
                source: DateSource::MessagingAppName,
                ..
            })
        )
    }
}

/// Interpret a naive wall-clock time in the local zone.
/// Ambiguous times take the earlier instant; times inside a DST gap shift forward an hour.
pub fn local_to_epoch(naive: NaiveDateTime) -> Option<i64> {
    naive
        .and_local_timezone(Local)
        .earliest()
        .or_else(|| (naive + TimeDelta::hours(1)).and_local_timezone(Local).earliest())
        .map(|dt| dt.timestamp())
}

/// Epoch seconds to local wall-clock time.
pub fn epoch_to_local(epoch: i64) -> Option<NaiveDateTime> {
    let utc = DateTime::from_timestamp(epoch, 0)?;
    Some(utc.with_timezone(&Local).naive_local())
}

fn resolved(timestamp: i64, source: DateSource, orientation: Option<u16>) -> ResolveOutcome {
    ResolveOutcome {
        resolution: Some(Resolution { timestamp, source }),
        orientation,
    }
}

/// Run the fallback chain for one file; the first source that yields a time wins.
pub fn resolve(path: &Path, layout: ExportLayout, config: &RunConfig) -> ResolveOutcome {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    // 1. Sidecar JSON (Takeout only)
    if layout == ExportLayout::GoogleTakeout {
        if let Some(ts) = json::read_sidecar_timestamp(path) {
            return resolved(ts, DateSource::Sidecar, None);
        }
    }

    // 2. + 3. Embedded EXIF, then embedded XMP
    let mut orientation = None;
    match fs::read(path) {
        Ok(bytes) => {
            if let Some(ts) = exif::read_exif_date(&bytes).and_then(local_to_epoch) {
                return resolved(ts, DateSource::Exif, None);
            }
            let scan = xmp::scan(&bytes);
            orientation = scan.orientation;
            if let Some(ts) = scan.date.and_then(local_to_epoch) {
                return resolved(ts, DateSource::Xmp, orientation);
            }
        }
        Err(e) => debug!("could not read {} for embedded metadata: {e}", path.display()),
    }

    // 4. Filename, messaging-app convention first
    if let Some(ts) = guess::parse_messaging_app_name(filename).and_then(local_to_epoch) {
        return resolved(ts, DateSource::MessagingAppName, orientation);
    }
    if let Some(ts) = guess::guess_date_from_filename(filename).and_then(local_to_epoch) {
        return resolved(ts, DateSource::Filename, orientation);
    }

    // 5. Filesystem mtime, opt-in only
    if config.use_mtime_fallback {
        match filesystem_mtime(path) {
            Some(ts) => return resolved(ts, DateSource::Mtime, orientation),
            None => debug!("no usable mtime for {}", path.display()),
        }
    }

    ResolveOutcome {
        resolution: None,
        orientation,
    }
}

fn filesystem_mtime(path: &Path) -> Option<i64> {
    let metadata = fs::metadata(path).ok()?;
    let ft = filetime::FileTime::from_last_modification_time(&metadata);
    Some(ft.unix_seconds())
}
