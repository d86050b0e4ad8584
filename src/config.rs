use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coordinator::CoordinatorOptions;
use crate::error::{Error, Result};
use crate::metadata::MetadataFormat;
use crate::order_plan::MAX_ITEMS_PER_ORDER;
use crate::retry::RetryPolicy;

pub const DEFAULT_DOWNLOAD_DIR: &str = "./planet_downloads";
pub const DEFAULT_ORDER_NAME: &str = "planet_download_order";

/// Settings for one acquisition run, usually read from a TOML file.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Boundary file path or inline GeoJSON.
    pub aoi: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub item_types: Vec<String>,
    pub bundles: Vec<String>,
    pub cloud_cover: f64,
    pub download_dir: PathBuf,
    pub chunk_size: usize,
    /// Orders submitted and polled at once.
    pub concurrency: usize,
    pub download_concurrency: usize,
    pub overwrite: bool,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
    pub metadata_format: MetadataFormat,
    pub order_name: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            aoi: String::new(),
            start_date: None,
            end_date: None,
            item_types: vec!["PSScene".to_string()],
            bundles: vec!["analytic_udm2".to_string()],
            cloud_cover: 0.2,
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            chunk_size: MAX_ITEMS_PER_ORDER,
            concurrency: 4,
            download_concurrency: 4,
            overwrite: false,
            poll_interval_secs: 30,
            timeout_secs: 2 * 60 * 60,
            metadata_format: MetadataFormat::GeoJson,
            order_name: DEFAULT_ORDER_NAME.to_string(),
            api_key: None,
        }
    }
}

impl Settings {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn from_template(table: &toml::Table) -> Result<Self> {
        toml::from_str(&table.to_string()).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    pub fn dates(&self) -> Result<(NaiveDate, NaiveDate)> {
        let start = self
            .start_date
            .ok_or_else(|| Error::InvalidConfig("start_date is required".to_string()))?;
        let end = self
            .end_date
            .ok_or_else(|| Error::InvalidConfig("end_date is required".to_string()))?;
        Ok((start, end))
    }

    pub fn validate(&self) -> Result<()> {
        if self.aoi.trim().is_empty() {
            return Err(Error::InvalidConfig("aoi is required".to_string()));
        }
        self.dates()?;
        if self.chunk_size == 0 || self.chunk_size > MAX_ITEMS_PER_ORDER {
            return Err(Error::InvalidConfig(format!(
                "chunk_size must be between 1 and {MAX_ITEMS_PER_ORDER}"
            )));
        }
        if self.concurrency == 0 || self.download_concurrency == 0 {
            return Err(Error::InvalidConfig(
                "concurrency values must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            poll_interval: self.poll_interval(),
            timeout: self.timeout(),
            concurrency: self.concurrency,
            retry: RetryPolicy::default(),
        }
    }
}

/// Example settings for the Utuado, Puerto Rico test area.
pub fn settings_template() -> toml::Table {
    toml::toml! {
        aoi = "demos/utuado.geojson"
        start_date = "2020-01-01"
        end_date = "2020-02-01"
        item_types = ["PSScene"]
        bundles = ["analytic_udm2"]
        cloud_cover = 0.2
        download_dir = "./planet_downloads"
        metadata_format = "GeoJson"
    }
}
