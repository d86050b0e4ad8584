use anyhow::Result;
use std::path::PathBuf;

use planet_acquire::acquisition;
use planet_acquire::config::{settings_template, Settings};
use planet_acquire::logging;
use planet_acquire::provider::planet::{ApiKey, Client};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(1);
    let output_dir = PathBuf::from("./outputs/planet");

    let mut settings = Settings::from_template(&settings_template())?;
    settings.download_dir = output_dir.clone();
    std::fs::create_dir_all(&output_dir)?;
    settings.write(output_dir.join("settings.toml"))?;

    let client = Client::new(ApiKey::resolve(None)?)?;
    let report = acquisition::run(&client, &settings, None).await?;
    println!(
        "{} scenes, {} orders, {} failed orders",
        report.scenes,
        report.orders.len(),
        report.failed_orders()
    );

    Ok(())
}
