use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::passenger::Passenger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookingId(u64);

impl BookingId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BookingStatus {
    Pending,
    DriverAcquired,
    Completed,
    Rejected,
    Failed,
}

/// A passenger's request for a ride inside one region.
#[derive(Debug, Clone)]
pub struct Booking {
    id: BookingId,
    region: String,
    passenger: Passenger,
    driver: Option<String>,
    status: BookingStatus,
    created_at: DateTime<Utc>,
}

impl Booking {
    pub fn new(id: BookingId, region: impl Into<String>, passenger: Passenger) -> Self {
        Self {
            id,
            region: region.into(),
            passenger,
            driver: None,
            status: BookingStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> BookingId {
        self.id
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn passenger(&self) -> &Passenger {
        &self.passenger
    }

    pub fn driver(&self) -> Option<&str> {
        self.driver.as_deref()
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn assign_driver(&mut self, driver: &str) {
        self.driver = Some(driver.to_string());
        self.status = BookingStatus::DriverAcquired;
    }

    pub(crate) fn reject(&mut self) {
        self.status = BookingStatus::Rejected;
    }

    pub(crate) fn fail(&mut self) {
        self.status = BookingStatus::Failed;
    }

    pub(crate) fn complete(&mut self, pickup: Duration, travel: Duration) -> BookingResult {
        self.status = BookingStatus::Completed;

        BookingResult {
            booking_id: self.id,
            region: self.region.clone(),
            passenger_name: self.passenger.name().to_string(),
            driver_name: self.driver.clone().unwrap_or_default(),
            pickup_duration_ms: pickup.as_millis() as u64,
            travel_duration_ms: travel.as_millis() as u64,
            completed_at: Utc::now(),
        }
    }
}

impl fmt::Display for Booking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.id,
            self.driver.as_deref().unwrap_or("null"),
            self.passenger.name(),
            self.region
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingResult {
    pub booking_id: BookingId,
    pub region: String,
    pub passenger_name: String,
    pub driver_name: String,
    pub pickup_duration_ms: u64,
    pub travel_duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl BookingResult {
    pub fn trip_duration(&self) -> Duration {
        Duration::from_millis(self.pickup_duration_ms + self.travel_duration_ms)
    }
}
