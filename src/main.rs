use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use planet_acquire::acquisition;
use planet_acquire::config::Settings;
use planet_acquire::download::{Progress, ProgressCallback};
use planet_acquire::logging;
use planet_acquire::metadata::MetadataFormat;
use planet_acquire::provider::planet::{ApiKey, Client};

const PROGRESS_STEP: u64 = 64 * 1024 * 1024;

/// Search, order, and download Planet data.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// TOML settings file; command line values take precedence.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// AOI as a GeoJSON file path (.geojson or .json; shapefiles are not read) or a raw GeoJSON string.
    #[arg(short, long)]
    aoi: Option<String>,

    /// Start date (YYYY-MM-DD).
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// End date (YYYY-MM-DD).
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Item types to search/order (e.g., PSScene, REScene).
    #[arg(long, num_args = 1..)]
    item_types: Option<Vec<String>>,

    /// Product bundles (e.g., analytic_udm2, analytic_sr_udm2).
    #[arg(short, long, num_args = 1..)]
    bundles: Option<Vec<String>>,

    /// Max cloud cover (0-1).
    #[arg(long)]
    cloud_cover: Option<f64>,

    /// Directory to save downloaded imagery and metadata.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Overwrite existing downloads.
    #[arg(long)]
    overwrite: bool,

    /// Disable progress reporting.
    #[arg(long)]
    no_progress: bool,

    /// Concurrent archive downloads.
    #[arg(long)]
    threads: Option<usize>,

    /// Seconds between order status checks.
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Seconds to wait for each order before giving up on it.
    #[arg(long)]
    timeout: Option<u64>,

    /// Metadata file format: geojson or gpkg.
    #[arg(long)]
    metadata_format: Option<MetadataFormat>,

    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::read(path)
                .with_context(|| format!("Unable to read settings from {}", path.display()))?,
            None => Settings::default(),
        };
        if let Some(aoi) = &self.aoi {
            settings.aoi = aoi.clone();
        }
        if self.start_date.is_some() {
            settings.start_date = self.start_date;
        }
        if self.end_date.is_some() {
            settings.end_date = self.end_date;
        }
        if let Some(item_types) = &self.item_types {
            settings.item_types = item_types.clone();
        }
        if let Some(bundles) = &self.bundles {
            settings.bundles = bundles.clone();
        }
        if let Some(cloud_cover) = self.cloud_cover {
            settings.cloud_cover = cloud_cover;
        }
        if let Some(output_dir) = &self.output_dir {
            settings.download_dir = output_dir.clone();
        }
        if self.overwrite {
            settings.overwrite = true;
        }
        if let Some(threads) = self.threads {
            settings.download_concurrency = threads;
        }
        if let Some(poll_interval) = self.poll_interval {
            settings.poll_interval_secs = poll_interval;
        }
        if let Some(timeout) = self.timeout {
            settings.timeout_secs = timeout;
        }
        if let Some(format) = self.metadata_format {
            settings.metadata_format = format;
        }
        Ok(settings)
    }
}

/// Logs cumulative bytes every `PROGRESS_STEP`.
fn progress_logger() -> ProgressCallback {
    let transferred = Arc::new(AtomicU64::new(0));
    let callback: ProgressCallback = Arc::new(move |progress: &Progress<'_>| {
        let before = transferred.fetch_add(progress.delta, Ordering::Relaxed);
        let after = before + progress.delta;
        if before / PROGRESS_STEP != after / PROGRESS_STEP {
            info!(
                file = progress.file_name,
                total_mb = after / (1024 * 1024),
                "Download progress"
            );
        }
    });
    callback
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let timer = Instant::now();
    let settings = cli.settings()?;
    let key = ApiKey::resolve(settings.api_key.as_deref())?;
    let client = Client::new(key)?;

    let progress = (!cli.no_progress).then(progress_logger);
    let report = acquisition::run(&client, &settings, progress).await?;

    info!(
        "Process completed in {:.2} minutes",
        timer.elapsed().as_secs_f64() / 60.0
    );

    if report.has_failures() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_aoi_help_names_geojson_only() {
        let command = Cli::command();
        let aoi = command
            .get_arguments()
            .find(|arg| arg.get_id() == "aoi")
            .unwrap();
        let help = aoi.get_help().unwrap().to_string();
        assert!(help.contains("GeoJSON"));
        assert!(help.contains("shapefiles are not read"));
    }

    #[test]
    fn test_command_line_overrides_defaults() {
        let cli = Cli::parse_from(["planet-acquire", "--aoi", "aoi.geojson", "--timeout", "60"]);
        let settings = cli.settings().unwrap();
        assert_eq!(settings.aoi, "aoi.geojson");
        assert_eq!(settings.timeout_secs, 60);
    }
}
