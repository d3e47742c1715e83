use std::time::Instant;

use futures::future::join_all;
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::dispatch::Dispatch;
use crate::engine::region::RegionSnapshot;
use crate::error::DispatchError;
use crate::models::booking::BookingResult;
use crate::models::driver::Driver;
use crate::models::passenger::Passenger;

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub drivers: usize,
    pub passengers: usize,
    pub completed: usize,
    pub rejected: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    pub regions: Vec<RegionSnapshot>,
    pub results: Vec<BookingResult>,
}

/// Runs one full dispatch cycle: register drivers, book every passenger into
/// a random region, wait for the results and wind everything down.
pub async fn run(config: &Config) -> Result<SimulationReport, DispatchError> {
    let started = Instant::now();
    let dispatch = Dispatch::new(config.regions.iter().cloned(), config.log_events)?;
    let region_names: Vec<String> = dispatch.region_names().map(str::to_string).collect();

    info!(
        drivers = config.drivers,
        passengers = config.passengers,
        regions = region_names.len(),
        "simulation started"
    );

    for index in 0..config.drivers {
        let driver = Driver::new(format!("D-{index}"), random_below(config.max_sleep_ms));
        if !dispatch.add_driver(driver).await {
            return Err(DispatchError::InvalidConfig(
                "driver pool closed before the run started".to_string(),
            ));
        }
    }

    let mut handles = Vec::with_capacity(config.passengers);
    let mut rejected = 0;
    for index in 0..config.passengers {
        let passenger = Passenger::new(format!("P-{index}"), random_below(config.max_sleep_ms));
        let region = &region_names[rand::rng().random_range(0..region_names.len())];

        match dispatch.book_passenger(passenger, region) {
            Ok(handle) => handles.push(handle),
            Err(err) if err.is_rejection() => rejected += 1,
            Err(err) => return Err(err),
        }
    }

    let mut results = Vec::with_capacity(handles.len());
    let mut failed = 0;
    for outcome in join_all(handles).await {
        match outcome {
            Ok(result) => results.push(result),
            Err(err) => {
                warn!(error = %err, "booking did not complete");
                failed += 1;
            }
        }
    }

    dispatch.shutdown();
    dispatch.drained().await;
    dispatch.close_driver_pool();

    let report = SimulationReport {
        drivers: config.drivers,
        passengers: config.passengers,
        completed: results.len(),
        rejected,
        failed,
        elapsed_ms: started.elapsed().as_millis() as u64,
        regions: dispatch.snapshots(),
        results,
    };

    info!(
        completed = report.completed,
        rejected = report.rejected,
        failed = report.failed,
        elapsed_ms = report.elapsed_ms,
        "simulation finished"
    );

    Ok(report)
}

fn random_below(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    rand::rng().random_range(0..max)
}
