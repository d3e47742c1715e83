use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::engine::delay::{Delay, RandomDelay};
use crate::engine::pool::{DriverLease, IdleDriverPool};
use crate::engine::region::{BookingHandle, Region, RegionSnapshot};
use crate::error::DispatchError;
use crate::models::booking::{Booking, BookingId};
use crate::models::driver::Driver;
use crate::models::passenger::Passenger;
use crate::observability::metrics::Metrics;

/// State shared by the dispatch and every region's workers.
pub(crate) struct DispatchCore {
    pool: Arc<IdleDriverPool>,
    delay: Arc<dyn Delay>,
    log_events: bool,
    next_booking_id: AtomicU64,
    pub(crate) metrics: Metrics,
}

impl DispatchCore {
    pub(crate) fn next_booking_id(&self) -> BookingId {
        BookingId::new(self.next_booking_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub(crate) fn delay(&self) -> &dyn Delay {
        self.delay.as_ref()
    }

    pub(crate) async fn acquire_driver(&self) -> Option<DriverLease> {
        let driver = self.pool.take().await?;
        self.refresh_idle_gauge();
        Some(DriverLease::new(
            driver,
            self.pool.clone(),
            self.metrics.idle_drivers.clone(),
        ))
    }

    pub(crate) fn log_event(&self, booking: &Booking, message: &str) {
        if !self.log_events {
            return;
        }
        info!(booking = %booking, "{}", message);
    }

    fn refresh_idle_gauge(&self) {
        self.metrics.idle_drivers.set(self.pool.len() as i64);
    }
}

/// Top-level coordinator: owns the idle-driver pool and the regions.
///
/// Region membership is fixed at construction, so lookups need no locking.
pub struct Dispatch {
    core: Arc<DispatchCore>,
    regions: HashMap<String, Region>,
}

impl Dispatch {
    /// Builds a dispatch with a fresh 999-slot idle pool and random delays.
    /// Must be called from within a tokio runtime.
    pub fn new<I, S>(regions: I, log_events: bool) -> Result<Self, DispatchError>
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        Self::with_parts(
            regions,
            log_events,
            Arc::new(IdleDriverPool::default()),
            Arc::new(RandomDelay),
        )
    }

    pub fn with_parts<I, S>(
        regions: I,
        log_events: bool,
        pool: Arc<IdleDriverPool>,
        delay: Arc<dyn Delay>,
    ) -> Result<Self, DispatchError>
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        let core = Arc::new(DispatchCore {
            pool,
            delay,
            log_events,
            next_booking_id: AtomicU64::new(0),
            metrics: Metrics::new(),
        });

        let mut built = HashMap::new();
        for (name, capacity) in regions {
            let name = name.into();
            if built.contains_key(&name) {
                return Err(DispatchError::InvalidConfig(format!(
                    "region {name} configured twice"
                )));
            }
            let region = Region::new(core.clone(), name.clone(), capacity)?;
            built.insert(name, region);
        }

        if built.is_empty() {
            return Err(DispatchError::InvalidConfig(
                "at least one region is required".to_string(),
            ));
        }

        info!(regions = built.len(), log_events, "dispatch created");

        Ok(Self {
            core,
            regions: built,
        })
    }

    /// Adds `driver` to the idle pool, waiting while the pool is full.
    /// Returns `false` if the pool has been closed.
    pub async fn add_driver(&self, driver: Driver) -> bool {
        let added = match self.core.pool.put(driver).await {
            Ok(()) => true,
            Err(driver) => {
                warn!(driver = %driver, "idle pool closed; driver not added");
                false
            }
        };
        self.core.refresh_idle_gauge();
        added
    }

    /// Takes the longest-idle driver, waiting until one is available.
    /// Returns `None` once the pool is closed and empty.
    pub async fn get_driver(&self) -> Option<Driver> {
        let driver = self.core.pool.take().await;
        self.core.refresh_idle_gauge();
        driver
    }

    /// Routes a booking for `passenger` to `region`.
    ///
    /// Fails with [`DispatchError::UnknownRegion`] for unregistered names.
    /// Refusals by the region come back as errors whose
    /// [`DispatchError::is_rejection`] is true.
    pub fn book_passenger(
        &self,
        passenger: Passenger,
        region: &str,
    ) -> Result<BookingHandle, DispatchError> {
        let target = self
            .regions
            .get(region)
            .ok_or_else(|| DispatchError::UnknownRegion(region.to_string()))?;

        target.book_passenger(passenger)
    }

    /// Point-in-time sum of admitted bookings not yet holding a driver.
    pub fn bookings_awaiting_driver(&self) -> usize {
        self.regions
            .values()
            .map(Region::bookings_awaiting_driver)
            .sum()
    }

    pub fn log_event(&self, booking: &Booking, message: &str) {
        self.core.log_event(booking, message);
    }

    /// Tells every region to finish admitted work and refuse new bookings.
    pub fn shutdown(&self) {
        for region in self.regions.values() {
            region.shutdown();
        }
    }

    /// Resolves once every region has drained after [`Dispatch::shutdown`].
    pub async fn drained(&self) {
        for region in self.regions.values() {
            region.drained().await;
        }
    }

    /// Closes the idle pool at the end of a run. Workers still waiting for a
    /// driver give up and drivers can no longer rejoin the pool.
    pub fn close_driver_pool(&self) {
        self.core.pool.close();
    }

    pub fn idle_drivers(&self) -> usize {
        self.core.pool.len()
    }

    pub fn region(&self, name: &str) -> Option<&Region> {
        self.regions.get(name)
    }

    pub fn region_names(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(String::as_str)
    }

    pub fn snapshots(&self) -> Vec<RegionSnapshot> {
        let mut snapshots: Vec<RegionSnapshot> =
            self.regions.values().map(Region::snapshot).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn metrics(&self) -> &Metrics {
        &self.core.metrics
    }
}
