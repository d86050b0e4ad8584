use chrono::{NaiveDate, NaiveTime, SecondsFormat};
use geojson::Geometry;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::geometry::Region;
use crate::provider::CatalogApi;
use crate::retry::{with_retry, RetryPolicy};

/// Spatial-temporal query against the catalog.
#[derive(Clone, Debug)]
pub struct Query {
    pub region: Region,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub item_types: Vec<String>,
    pub cloud_cover_max: f64,
}

impl Query {
    pub fn validate(&self) -> Result<()> {
        if self.start_date > self.end_date {
            return Err(Error::InvalidQuery(format!(
                "start date {} is after end date {}",
                self.start_date, self.end_date
            )));
        }
        if !(0.0..=1.0).contains(&self.cloud_cover_max) {
            return Err(Error::InvalidQuery(format!(
                "cloud cover must be within [0, 1], got {}",
                self.cloud_cover_max
            )));
        }
        if self.item_types.is_empty() {
            return Err(Error::InvalidQuery("no item types given".to_string()));
        }
        Ok(())
    }

    /// Composite filter: geometry AND acquisition date AND cloud cover AND
    /// item type, restricted to downloadable scenes.
    pub fn filter(&self) -> Value {
        let start = self.start_date.and_time(NaiveTime::MIN).and_utc();
        let end = self
            .end_date
            .and_hms_opt(23, 59, 59)
            .unwrap_or_else(|| self.end_date.and_time(NaiveTime::MIN))
            .and_utc();
        json!({
            "type": "AndFilter",
            "config": [
                {
                    "type": "GeometryFilter",
                    "field_name": "geometry",
                    "config": self.region.geometry(),
                },
                {
                    "type": "DateRangeFilter",
                    "field_name": "acquired",
                    "config": {
                        "gte": start.to_rfc3339_opts(SecondsFormat::Secs, true),
                        "lte": end.to_rfc3339_opts(SecondsFormat::Secs, true),
                    },
                },
                {
                    "type": "RangeFilter",
                    "field_name": "cloud_cover",
                    "config": {"lte": self.cloud_cover_max},
                },
                {
                    "type": "StringInFilter",
                    "field_name": "item_type",
                    "config": self.item_types,
                },
                {
                    "type": "PermissionFilter",
                    "config": ["assets:download"],
                },
            ],
        })
    }

    pub fn search_request(&self) -> SearchRequest {
        SearchRequest {
            item_types: self.item_types.clone(),
            filter: self.filter(),
        }
    }
}

/// Body of a quick-search call.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SearchRequest {
    pub item_types: Vec<String>,
    pub filter: Value,
}

/// One catalog scene.
#[derive(Clone, Debug, PartialEq)]
pub struct SceneRecord {
    pub scene_id: String,
    pub item_type: String,
    pub geometry: Option<Geometry>,
    pub properties: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawFeature {
    id: String,
    geometry: Option<Geometry>,
    #[serde(default)]
    properties: Map<String, Value>,
}

impl<'de> Deserialize<'de> for SceneRecord {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawFeature::deserialize(deserializer)?;
        let item_type = raw
            .properties
            .get("item_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            scene_id: raw.id,
            item_type,
            geometry: raw.geometry,
            properties: raw.properties,
        })
    }
}

/// Searches the catalog, following page links until the catalog has no more
/// results. An empty result is not an error.
pub async fn search(
    catalog: &impl CatalogApi,
    query: &Query,
    retry: &RetryPolicy,
) -> Result<Vec<SceneRecord>> {
    query.validate()?;
    let request = query.search_request();

    let mut page = with_retry(retry, "catalog search", || catalog.search(&request))
        .await
        .map_err(Error::CatalogUnavailable)?;
    let mut scenes = std::mem::take(&mut page.scenes);

    while let Some(next) = page.next.take() {
        debug!(url = %next, "Fetching next search page");
        page = with_retry(retry, "catalog search page", || catalog.next_page(&next))
            .await
            .map_err(Error::CatalogUnavailable)?;
        if page.scenes.is_empty() {
            break;
        }
        scenes.append(&mut page.scenes);
    }

    info!(count = scenes.len(), "Found {} images", scenes.len());
    Ok(scenes)
}
