use std::sync::Arc;

use tracing::warn;

use crate::dispatch::DispatchCore;
use crate::engine::region::RegionStats;
use crate::error::DispatchError;
use crate::models::booking::{Booking, BookingResult};

/// Runs one booking to completion on the calling worker.
///
/// The driver is held through a lease for the whole trip, so a booking that
/// is dropped part way still puts its driver back into circulation.
pub(crate) async fn run_booking(
    core: Arc<DispatchCore>,
    stats: &RegionStats,
    mut booking: Booking,
) -> Result<BookingResult, DispatchError> {
    core.log_event(&booking, "Starting booking, getting driver");

    let acquired = core.acquire_driver().await;
    stats.leave_awaiting();
    core.metrics.bookings_awaiting_driver.dec();

    let Some(mut lease) = acquired else {
        booking.fail();
        core.log_event(&booking, "Driver pool closed while waiting for a driver");
        return Err(DispatchError::DriverAcquisitionCancelled(booking.id()));
    };

    let Some(driver) = lease.driver_mut() else {
        booking.fail();
        return Err(DispatchError::DriverAcquisitionCancelled(booking.id()));
    };

    booking.assign_driver(driver.name());
    core.log_event(&booking, "Starting, on way to passenger");

    let pickup = driver
        .pick_up_passenger(booking.passenger().clone(), core.delay())
        .await;
    core.log_event(&booking, "Collected passenger, on way to destination");

    let travel = driver.drive_to_destination(core.delay()).await;
    core.log_event(&booking, "At destination, driver is now free");
    driver.drop_off();

    if let Err(err) = lease.release().await {
        warn!(booking = %booking, error = %err, "driver retired for the rest of the run");
        core.log_event(&booking, "Driver could not rejoin the idle pool");
    }

    let result = booking.complete(pickup, travel);
    core.log_event(&booking, "Booking completed");

    Ok(result)
}
