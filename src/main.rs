use nuber_dispatch::config::Config;
use nuber_dispatch::error::DispatchError;
use nuber_dispatch::simulation;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), DispatchError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let report = simulation::run(&config).await?;

    let summary = json!({
        "drivers": report.drivers,
        "passengers": report.passengers,
        "completed": report.completed,
        "rejected": report.rejected,
        "failed": report.failed,
        "elapsed_ms": report.elapsed_ms,
        "regions": report.regions,
    });
    println!("{summary:#}");

    Ok(())
}
