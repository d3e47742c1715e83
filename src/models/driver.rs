use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::engine::delay::Delay;
use crate::models::passenger::Passenger;

/// A driver circulating between the idle pool and bookings.
///
/// Drivers move by value: whichever booking owns one is the only party
/// that can assign it a passenger.
#[derive(Debug)]
pub struct Driver {
    name: String,
    max_pickup_delay_ms: u64,
    passenger: Option<Passenger>,
}

impl Driver {
    pub fn new(name: impl Into<String>, max_pickup_delay_ms: u64) -> Self {
        Self {
            name: name.into(),
            max_pickup_delay_ms,
            passenger: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_pickup_delay(&self) -> Duration {
        Duration::from_millis(self.max_pickup_delay_ms)
    }

    pub fn passenger(&self) -> Option<&Passenger> {
        self.passenger.as_ref()
    }

    /// Takes on `passenger`, then travels to them for up to the driver's
    /// maximum pickup delay.
    pub async fn pick_up_passenger(&mut self, passenger: Passenger, delay: &dyn Delay) -> Duration {
        debug!(driver = %self.name, passenger = %passenger.name(), "driver heading to pickup");
        self.passenger = Some(passenger);
        delay.delay(self.max_pickup_delay()).await
    }

    /// Travels for up to the current passenger's maximum travel delay.
    /// A driver without a passenger has nowhere to go.
    pub async fn drive_to_destination(&self, delay: &dyn Delay) -> Duration {
        match &self.passenger {
            Some(passenger) => delay.delay(passenger.max_travel_delay()).await,
            None => Duration::ZERO,
        }
    }

    pub fn drop_off(&mut self) -> Option<Passenger> {
        self.passenger.take()
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
