use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::item_type::{validate_bundle, Bundle, ItemType};

pub const MAX_ITEMS_PER_ORDER: usize = 500;

/// One order for a contiguous slice of scene ids.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct OrderRequest {
    pub name: String,
    pub item_type: ItemType,
    pub bundle: Bundle,
    pub scene_ids: Vec<String>,
}

/// Item type normalized and paired with the bundles it will be ordered with.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderSpec {
    pub item_type: ItemType,
    pub bundles: Vec<Bundle>,
}

impl OrderSpec {
    /// Normalizes `item_type` and checks every bundle against it.
    pub fn new(item_type: &str, bundles: &[String]) -> Result<Self> {
        let item_type = ItemType::normalize(item_type)?;
        if bundles.is_empty() {
            return Err(Error::InvalidConfig("no bundles given".to_string()));
        }
        let bundles = bundles
            .iter()
            .map(|bundle| validate_bundle(item_type, bundle))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { item_type, bundles })
    }
}

/// Splits `scene_ids` into chunks of at most `chunk_size` and builds one
/// request per chunk and bundle. Chunks keep input order; requests are
/// chunk-major, bundle-minor. Nothing is built if any pair is invalid.
pub fn build(
    scene_ids: &[String],
    item_type: &str,
    bundles: &[String],
    chunk_size: usize,
    name: &str,
) -> Result<Vec<OrderRequest>> {
    let spec = OrderSpec::new(item_type, bundles)?;
    build_for_spec(scene_ids, &spec, chunk_size, name)
}

pub fn build_for_spec(
    scene_ids: &[String],
    spec: &OrderSpec,
    chunk_size: usize,
    name: &str,
) -> Result<Vec<OrderRequest>> {
    if chunk_size == 0 || chunk_size > MAX_ITEMS_PER_ORDER {
        return Err(Error::InvalidConfig(format!(
            "chunk size must be between 1 and {MAX_ITEMS_PER_ORDER}, got {chunk_size}"
        )));
    }

    let mut requests = vec![];
    for chunk in scene_ids.chunks(chunk_size) {
        for bundle in &spec.bundles {
            requests.push(OrderRequest {
                name: name.to_string(),
                item_type: spec.item_type,
                bundle: *bundle,
                scene_ids: chunk.to_vec(),
            });
        }
    }
    Ok(requests)
}

/// Drops repeated ids, keeping the first occurrence.
pub fn dedup_ids<I>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

/// Every request of a run, written next to the downloads for reference.
#[derive(Deserialize, Serialize, Debug, Default, PartialEq)]
pub struct OrderPlan {
    pub requests: Vec<OrderRequest>,
}

impl OrderPlan {
    pub fn new(requests: Vec<OrderRequest>) -> Self {
        Self { requests }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn scene_count(&self) -> usize {
        self.requests.iter().map(|r| r.scene_ids.len()).sum()
    }
}
