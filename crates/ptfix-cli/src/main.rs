use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use ptfix_core::{CancellationToken, Classification, ProcessControl, ProcessOptions, RunConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ptfix", version, about = "Recover photo capture times in a Google Takeout or Apple Photos export zip")]
struct Cli {
    /// Export archive (.zip)
    archive: PathBuf,

    /// Output archive to create
    #[arg(short, long)]
    output: PathBuf,

    /// JSON file with run settings; flags below switch settings on
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the file modification time when no other date is found
    #[arg(long)]
    use_mtime_fallback: bool,

    /// Drop files without any date instead of copying them to Needs_Review/
    #[arg(long)]
    skip_no_metadata: bool,

    /// Keep only the first of byte-identical files
    #[arg(long)]
    remove_duplicates: bool,

    /// Directory for the temporary working copy (default: system temp dir)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Print run statistics as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let t_total = std::time::Instant::now();

    let mut config = match &cli.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    config.use_mtime_fallback |= cli.use_mtime_fallback;
    config.skip_no_metadata |= cli.skip_no_metadata;
    config.remove_duplicates |= cli.remove_duplicates;

    let mut options = ProcessOptions::new(cli.archive, cli.output);
    options.work_dir = cli.work_dir;
    options.config = config;

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("failed to install Ctrl-C handler")?;
    let control = ProcessControl::new().with_cancel_token(token);

    let bar = ProgressBar::new(0);
    bar.set_style(ProgressStyle::default_bar().template("{prefix:>8} [{bar:40}] {pos}/{len} {msg}")?);

    let stats = ptfix_core::process_with_control(&options, &control, &|stage, current, total, message| {
        bar.set_prefix(stage.to_string());
        bar.set_length(total);
        bar.set_position((current + 1).min(total));
        bar.set_message(message.to_string());
    });
    bar.finish_and_clear();
    let stats = stats?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        eprintln!(
            "Done! {} {} files: {} fixed, {} from filename, {} for review, {} skipped, \
             {} duplicates removed, {} errors ({:.2}s)",
            stats.total_files,
            stats.export_layout.as_str(),
            stats.count(Classification::Fixed),
            stats.count(Classification::RestoredFromFilename),
            stats.count(Classification::RenamedOnly),
            stats.count(Classification::Skipped),
            stats.duplicates_removed,
            stats.errors,
            t_total.elapsed().as_secs_f64()
        );
    }

    Ok(())
}
