//! Search, order and download in one run.
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::Settings;
use crate::coordinator::{OrderCoordinator, OrderReport};
use crate::download::{self, DownloadOptions, DownloadResult, DownloadStatus, ProgressCallback};
use crate::error::Result;
use crate::geometry::{resolve, GeometryInput};
use crate::item_type::ItemType;
use crate::metadata;
use crate::order::OrderHandle;
use crate::order_plan::{build_for_spec, dedup_ids, OrderPlan, OrderRequest, OrderSpec};
use crate::provider::{ArchiveSource, CatalogApi, OrdersApi};
use crate::retry::RetryPolicy;
use crate::search::{search, Query, SceneRecord};

pub const ORDER_PLAN_FILE: &str = "order_plan.json";

/// Full accounting of a run.
#[derive(Debug, Default)]
pub struct AcquisitionReport {
    pub scenes: usize,
    pub metadata_path: Option<PathBuf>,
    pub plan_path: Option<PathBuf>,
    /// Scene ids found by the search that no order covers.
    pub unplanned: Vec<String>,
    pub orders: Vec<OrderReport>,
    pub downloads: Vec<DownloadResult>,
}

impl AcquisitionReport {
    pub fn failed_orders(&self) -> usize {
        self.orders.iter().filter(|o| o.error.is_some()).count()
    }

    pub fn count(&self, status: DownloadStatus) -> usize {
        self.downloads.iter().filter(|d| d.status == status).count()
    }

    pub fn has_failures(&self) -> bool {
        !self.unplanned.is_empty()
            || self.failed_orders() > 0
            || self.count(DownloadStatus::Failed) > 0
    }
}

/// Validates everything that can be checked locally, so that bad input is
/// reported before any network call.
pub fn prepare(settings: &Settings) -> Result<(Query, Vec<OrderSpec>)> {
    settings.validate()?;
    let region = resolve(&GeometryInput::from_arg(&settings.aoi)?)?;
    let (start_date, end_date) = settings.dates()?;
    let query = Query {
        region,
        start_date,
        end_date,
        item_types: settings.item_types.clone(),
        cloud_cover_max: settings.cloud_cover,
    };
    query.validate()?;

    let mut specs: Vec<OrderSpec> = vec![];
    for item_type in &settings.item_types {
        let spec = OrderSpec::new(item_type, &settings.bundles)?;
        if !specs.iter().any(|s| s.item_type == spec.item_type) {
            specs.push(spec);
        }
    }
    Ok((query, specs))
}

/// Scene ids grouped into order requests, plus the ids no request covers.
#[derive(Debug, Default, PartialEq)]
pub struct PlannedOrders {
    pub requests: Vec<OrderRequest>,
    pub unplanned: Vec<String>,
}

/// Groups scene ids under the order specs they belong to and builds the
/// requests. A scene without a recognisable item type goes to the only spec
/// when there is just one; otherwise it is reported as unplanned.
pub fn plan_orders(
    scenes: &[SceneRecord],
    specs: &[OrderSpec],
    chunk_size: usize,
    name: &str,
) -> Result<PlannedOrders> {
    let mut grouped: Vec<Vec<String>> = vec![vec![]; specs.len()];
    let mut unplanned = vec![];
    for scene in scenes {
        let position = match ItemType::normalize(&scene.item_type) {
            Ok(item_type) => specs.iter().position(|s| s.item_type == item_type),
            Err(_) if specs.len() == 1 => Some(0),
            Err(_) => None,
        };
        match position {
            Some(position) => grouped[position].push(scene.scene_id.clone()),
            None => unplanned.push(scene.scene_id.clone()),
        }
    }

    let unplanned = dedup_ids(unplanned);
    if !unplanned.is_empty() {
        warn!(
            scenes = unplanned.len(),
            "Scenes do not match any requested item type and will not be ordered"
        );
    }

    let mut requests = vec![];
    for (spec, ids) in specs.iter().zip(grouped) {
        let ids = dedup_ids(ids);
        if ids.is_empty() {
            continue;
        }
        info!(item_type = %spec.item_type, scenes = ids.len(), "Batching scenes into orders");
        requests.extend(build_for_spec(&ids, spec, chunk_size, name)?);
    }
    Ok(PlannedOrders {
        requests,
        unplanned,
    })
}

pub async fn run<C>(
    client: &C,
    settings: &Settings,
    progress: Option<ProgressCallback>,
) -> Result<AcquisitionReport>
where
    C: CatalogApi + OrdersApi + ArchiveSource,
{
    info!("Starting download process");
    let (query, specs) = prepare(settings)?;

    let scenes = search(client, &query, &RetryPolicy::default()).await?;
    if scenes.is_empty() {
        warn!("No images found. Make filters more flexible");
        return Ok(AcquisitionReport::default());
    }

    std::fs::create_dir_all(&settings.download_dir)?;
    let metadata_path = metadata::export(&scenes, &settings.download_dir, settings.metadata_format)?;

    let planned = plan_orders(&scenes, &specs, settings.chunk_size, &settings.order_name)?;
    let plan = OrderPlan::new(planned.requests);
    let plan_path = settings.download_dir.join(ORDER_PLAN_FILE);
    plan.write(&plan_path)?;
    info!(
        orders = plan.requests.len(),
        scenes = plan.scene_count(),
        path = %plan_path.display(),
        "Order plan written"
    );

    let coordinator = OrderCoordinator::new(client, settings.coordinator_options());
    let orders = coordinator.submit_and_wait(plan.requests).await;

    let handles: Vec<OrderHandle> = orders.iter().filter_map(|o| o.handle.clone()).collect();
    let options = DownloadOptions {
        destination: settings.download_dir.clone(),
        concurrency: settings.download_concurrency,
        overwrite: settings.overwrite,
        progress,
    };
    let downloads = download::download(client, &handles, &options).await;

    let report = AcquisitionReport {
        scenes: scenes.len(),
        metadata_path: Some(metadata_path),
        plan_path: Some(plan_path),
        unplanned: planned.unplanned,
        orders,
        downloads,
    };
    info!(
        scenes = report.scenes,
        unplanned = report.unplanned.len(),
        orders = report.orders.len(),
        failed_orders = report.failed_orders(),
        downloaded = report.count(DownloadStatus::Downloaded),
        skipped = report.count(DownloadStatus::Skipped),
        failed_downloads = report.count(DownloadStatus::Failed),
        "Acquisition finished"
    );
    Ok(report)
}
