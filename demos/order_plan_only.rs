use anyhow::Result;
use std::path::PathBuf;

use planet_acquire::acquisition::{plan_orders, prepare, ORDER_PLAN_FILE};
use planet_acquire::config::{settings_template, Settings};
use planet_acquire::logging;
use planet_acquire::metadata;
use planet_acquire::order_plan::OrderPlan;
use planet_acquire::provider::planet::{ApiKey, Client};
use planet_acquire::retry::RetryPolicy;
use planet_acquire::search::search;

/// Searches and writes the order plan plus scene metadata without placing
/// any orders.
#[tokio::main]
async fn main() -> Result<()> {
    logging::init(1);
    let output_dir = PathBuf::from("./outputs/plan_only");
    std::fs::create_dir_all(&output_dir)?;

    let settings = Settings::from_template(&settings_template())?;
    let (query, specs) = prepare(&settings)?;

    let client = Client::new(ApiKey::resolve(None)?)?;
    let scenes = search(&client, &query, &RetryPolicy::default()).await?;
    metadata::export(&scenes, &output_dir, settings.metadata_format)?;

    let planned = plan_orders(&scenes, &specs, settings.chunk_size, &settings.order_name)?;
    let plan = OrderPlan::new(planned.requests);
    plan.write(output_dir.join(ORDER_PLAN_FILE))?;
    println!(
        "{} orders covering {} scenes, {} scenes left out",
        plan.requests.len(),
        plan.scene_count(),
        planned.unplanned.len()
    );

    Ok(())
}
