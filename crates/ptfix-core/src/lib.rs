pub mod archive;
pub mod cancel;
pub mod date;
pub mod dedup;
pub mod error;
pub mod layout;
pub mod media;
pub mod package;
pub mod stamp;
pub mod writer;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use archive::ExtractionLimits;
pub use cancel::CancellationToken;
pub use error::{FileError, FixError, UnsafeReason};
pub use layout::ExportLayout;
pub use media::{Classification, MediaFile, MediaKind};

/// Name of the duplicate report placed at the output root
pub const DUPLICATES_REPORT: &str = "duplicates_report.txt";

/// Per-run behavior switches. All off by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Fall back to the file's modification time when nothing else resolves
    pub use_mtime_fallback: bool,
    /// Drop unresolvable files instead of copying them to `Needs_Review/`
    pub skip_no_metadata: bool,
    /// Exclude byte-identical files after the first
    pub remove_duplicates: bool,
}

impl RunConfig {
    /// Load from a JSON file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, FixError> {
        let bytes = fs::read(path).map_err(|e| FixError::io(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| FixError::InvalidConfig {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOptions {
    /// Input export archive
    pub archive: PathBuf,
    /// Output archive to create
    pub output: PathBuf,
    /// Parent for the private working directory (system temp dir if unset)
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub config: RunConfig,
    #[serde(default)]
    pub limits: ExtractionLimits,
}

impl ProcessOptions {
    pub fn new(archive: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            archive: archive.into(),
            output: output.into(),
            work_dir: None,
            config: RunConfig::default(),
            limits: ExtractionLimits::standard(),
        }
    }
}

/// Aggregate outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub export_layout: ExportLayout,
    /// Media files seen in the walk, duplicates included
    pub total_files: u64,
    pub by_classification: BTreeMap<Classification, u64>,
    pub duplicates_removed: u64,
    pub files_written: u64,
    /// Per-file write or I/O failures
    pub errors: u64,
}

impl RunStats {
    pub fn new(export_layout: ExportLayout) -> Self {
        let by_classification = [
            Classification::Fixed,
            Classification::RestoredFromFilename,
            Classification::RenamedOnly,
            Classification::Skipped,
        ]
        .into_iter()
        .map(|c| (c, 0))
        .collect();
        Self {
            export_layout,
            total_files: 0,
            by_classification,
            duplicates_removed: 0,
            files_written: 0,
            errors: 0,
        }
    }

    pub fn count(&self, classification: Classification) -> u64 {
        self.by_classification.get(&classification).copied().unwrap_or(0)
    }

    fn record(&mut self, classification: Classification) {
        *self.by_classification.entry(classification).or_default() += 1;
    }
}

/// Control options for process execution.
#[derive(Debug, Clone, Default)]
pub struct ProcessControl {
    /// Cancellation token checked between stages and between files.
    pub cancel_token: Option<CancellationToken>,
}

impl ProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    fn check(&self) -> Result<(), FixError> {
        match &self.cancel_token {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }
}

/// Type alias for progress callback: `(stage, current, total, message)`
pub type ProgressCallback<'a> = dyn Fn(&str, u64, u64, &str) + Send + Sync + 'a;

fn no_progress(_: &str, _: u64, _: u64, _: &str) {}

/// Throttled progress reporter; emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback<'a>,
    last_emit: Mutex<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback<'a>) -> Self {
        let start = Instant::now()
            .checked_sub(Duration::from_secs(1))
            .unwrap_or_else(Instant::now);
        Self {
            inner,
            last_emit: Mutex::new(start),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            let Ok(mut last) = self.last_emit.lock() else {
                return;
            };
            if last.elapsed() < Duration::from_millis(200) {
                return;
            }
            *last = Instant::now();
        }
        (self.inner)(stage, current, total, message);
    }
}

impl ThrottledProgress<'static> {
    /// A reporter that drops every update.
    pub fn silent() -> Self {
        Self::new(&no_progress)
    }
}

/// Run the full pipeline with progress reporting.
pub fn process(options: &ProcessOptions, progress_callback: &ProgressCallback<'_>) -> Result<RunStats, FixError> {
    process_with_control(options, &ProcessControl::default(), progress_callback)
}

/// Run the full pipeline with progress reporting and cancellation.
///
/// The archive is extracted into a private working directory that is removed
/// on every exit path, then the reorganized tree is zipped to `options.output`.
pub fn process_with_control(
    options: &ProcessOptions,
    control: &ProcessControl,
    progress_callback: &ProgressCallback<'_>,
) -> Result<RunStats, FixError> {
    let tp = ThrottledProgress::new(progress_callback);
    control.check()?;

    let mut builder = tempfile::Builder::new();
    builder.prefix("ptfix-");
    let work = match &options.work_dir {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(|e| FixError::io(dir, e))?;
            builder.tempdir_in(dir).map_err(|e| FixError::io(dir, e))?
        }
        None => builder
            .tempdir()
            .map_err(|e| FixError::io(std::env::temp_dir(), e))?,
    };
    debug!("working directory {}", work.path().display());

    let extract_root = work.path().join("extracted");
    let output_root = work.path().join("output");

    // Stage 1: Validate and extract
    let extracted = archive::extract_archive(&options.archive, &extract_root, &options.limits, &tp)?;
    info!("extracted {extracted} files from {}", options.archive.display());
    control.check()?;

    // Stage 2: Classify
    let export_layout = layout::classify(&extract_root);
    if export_layout == ExportLayout::Unknown {
        return Err(FixError::UnknownExportLayout);
    }
    info!("detected {} export", export_layout.as_str());

    // Stage 3: Resolve, dedup, write
    fs::create_dir_all(&output_root).map_err(|e| FixError::io(&output_root, e))?;
    let stats = run_pipeline(&extract_root, &output_root, export_layout, &options.config, &tp, control)?;
    control.check()?;

    // Stage 4: Package
    let packaged = package::package_output(&output_root, &options.output, &tp)?;
    info!("packaged {packaged} files into {}", options.output.display());

    if let Err(e) = work.close() {
        warn!("could not remove working directory: {e}");
    }
    Ok(stats)
}

/// Process an already-extracted export rooted at `extract_root` into `output_root`.
///
/// Files are handled strictly in walk order, which makes both the duplicate
/// choice and the collision counters reproducible.
pub fn run_pipeline(
    extract_root: &Path,
    output_root: &Path,
    export_layout: ExportLayout,
    config: &RunConfig,
    progress: &ThrottledProgress,
    control: &ProcessControl,
) -> Result<RunStats, FixError> {
    let mut media = layout::collect_media(extract_root);
    let total = media.len() as u64;
    progress.report("scan", total, total, "Media files collected");
    info!("found {total} media files");

    let mut stats = RunStats::new(export_layout);
    stats.total_files = total;

    if config.remove_duplicates {
        dedup::hash_candidates(&mut media, progress);
        control.check()?;
    }

    let mut deduplicator = dedup::Deduplicator::new();
    let mut organizer = writer::OutputOrganizer::new(output_root);
    let mut newest: Option<i64> = None;

    for (i, m) in media.iter_mut().enumerate() {
        control.check()?;
        progress.report("process", i as u64, total, "Processing files");

        let outcome = date::resolve(&m.path, export_layout, config);
        let classification = outcome.classification(config);
        m.timestamp = outcome.resolution.map(|r| r.timestamp);
        m.classification = Some(classification);
        m.is_messaging_app = outcome.is_messaging_app();
        m.orientation = outcome.orientation;

        if classification == Classification::Skipped {
            debug!("skipping {}: no timestamp found", m.relative);
            stats.record(classification);
            continue;
        }
        if config.remove_duplicates {
            if let Some(kept) = deduplicator.check(m) {
                debug!("{} duplicates {kept}", m.relative);
                continue;
            }
        }

        match write_one(&mut organizer, m, classification) {
            Ok(written) => {
                stats.files_written += 1;
                stats.record(classification);
                if let Err(e) = written {
                    warn!("{e}");
                    stats.errors += 1;
                }
                newest = newest.max(m.timestamp);
            }
            Err(e) => {
                warn!("{} not written: {e}", m.relative);
                stats.errors += 1;
            }
        }
    }
    progress.report("process", total, total, "Files processed");

    stats.duplicates_removed = deduplicator.removed() as u64;
    if let Some(report) = deduplicator.report() {
        let path = output_root.join(DUPLICATES_REPORT);
        fs::write(&path, report).map_err(|e| FixError::io(&path, e))?;
        // Tie the report's time to the run's content, not the wall clock
        if let Err(e) = stamp::set_file_times(&path, newest.unwrap_or(0)) {
            debug!("{e}");
        }
    }

    info!(
        "{} fixed, {} from filename, {} for review, {} skipped, {} duplicates, {} errors",
        stats.count(Classification::Fixed),
        stats.count(Classification::RestoredFromFilename),
        stats.count(Classification::RenamedOnly),
        stats.count(Classification::Skipped),
        stats.duplicates_removed,
        stats.errors,
    );
    Ok(stats)
}

/// Copy one file into place and stamp it.
///
/// The outer error means nothing was written. The inner one means the copy
/// exists but its timestamp could only be partly applied.
fn write_one(
    organizer: &mut writer::OutputOrganizer,
    m: &MediaFile,
    classification: Classification,
) -> Result<Result<(), FileError>, FileError> {
    let dest = match m.timestamp {
        Some(ts) => organizer.assign_dated(ts, m.is_messaging_app, classification, &m.extension())?,
        None => organizer.assign_review(&m.filename)?,
    };

    if let Err(e) = writer::copy_file(&m.path, &dest, m.timestamp.is_none()) {
        let _ = fs::remove_file(&dest);
        return Err(e);
    }

    Ok(match m.timestamp {
        Some(ts) => stamp::apply_timestamp(&dest, m.kind, ts, m.orientation),
        None => Ok(()),
    })
}
