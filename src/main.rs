use anyhow::Context;
use dotenvy::dotenv;
use log::info;

use crm_pipeline::{init_app_state, run_server, AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting crm-pipeline {}", env!("CARGO_PKG_VERSION"));
    let config = AppConfig::load().context("failed to load configuration")?;
    let state = init_app_state(config)?;
    run_server(state).await.context("HTTP server failed")?;
    info!("crm-pipeline stopped");
    Ok(())
}
