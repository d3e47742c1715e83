use std::sync::Arc;

use prometheus::IntGauge;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::warn;

use crate::error::DispatchError;
use crate::models::driver::Driver;

pub const MAX_IDLE_DRIVERS: usize = 999;

/// Bounded FIFO of idle drivers.
///
/// `put` waits while the pool is full and `take` waits while it is empty.
/// Waiting consumers are served in arrival order because the receiver sits
/// behind a fair mutex. Closing the pool refuses new drivers and wakes
/// consumers once the remaining drivers have been handed out.
pub struct IdleDriverPool {
    tx: mpsc::Sender<Driver>,
    rx: Mutex<mpsc::Receiver<Driver>>,
    closed: watch::Sender<bool>,
}

impl IdleDriverPool {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let (closed, _unused_rx) = watch::channel(false);

        Self {
            tx,
            rx: Mutex::new(rx),
            closed,
        }
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Inserts `driver`, waiting for a free slot. Hands the driver back if
    /// the pool is closed. Dropping the future before it resolves never
    /// inserts anything.
    pub async fn put(&self, driver: Driver) -> Result<(), Driver> {
        match self.reserve().await {
            Some(permit) => {
                permit.send(driver);
                Ok(())
            }
            None => Err(driver),
        }
    }

    /// Non-blocking insert, used where waiting is not possible.
    pub fn try_put(&self, driver: Driver) -> Result<(), Driver> {
        if self.is_closed() {
            return Err(driver);
        }
        self.tx.try_send(driver).map_err(|err| err.into_inner())
    }

    /// Removes the longest-idle driver, waiting until one is available.
    /// Returns `None` only once the pool is closed and drained.
    pub async fn take(&self) -> Option<Driver> {
        let mut closed = self.closed.subscribe();
        let mut rx = self.rx.lock().await;

        tokio::select! {
            biased;
            driver = rx.recv() => driver,
            _ = async { let _ = closed.wait_for(|closed| *closed).await; } => rx.try_recv().ok(),
        }
    }

    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    async fn reserve(&self) -> Option<mpsc::Permit<'_, Driver>> {
        if self.is_closed() {
            return None;
        }

        let mut closed = self.closed.subscribe();
        tokio::select! {
            biased;
            _ = async { let _ = closed.wait_for(|closed| *closed).await; } => None,
            permit = self.tx.reserve() => permit.ok(),
        }
    }
}

impl Default for IdleDriverPool {
    fn default() -> Self {
        Self::new(MAX_IDLE_DRIVERS)
    }
}

/// Exclusive hold on a driver taken from the pool.
///
/// A lease dropped without [`DriverLease::release`] makes a non-blocking
/// attempt to put the driver back; if that fails the driver is retired.
/// Either way `idle_gauge` is refreshed from the pool.
pub struct DriverLease {
    driver: Option<Driver>,
    pool: Arc<IdleDriverPool>,
    idle_gauge: IntGauge,
}

impl DriverLease {
    pub(crate) fn new(driver: Driver, pool: Arc<IdleDriverPool>, idle_gauge: IntGauge) -> Self {
        Self {
            driver: Some(driver),
            pool,
            idle_gauge,
        }
    }

    pub fn driver(&self) -> Option<&Driver> {
        self.driver.as_ref()
    }

    pub fn driver_mut(&mut self) -> Option<&mut Driver> {
        self.driver.as_mut()
    }

    /// Returns the driver to the idle pool, waiting for a slot if needed.
    pub async fn release(mut self) -> Result<(), DispatchError> {
        // driver stays in the lease until a slot is secured
        let permit = self.pool.reserve().await;
        let Some(driver) = self.driver.take() else {
            return Ok(());
        };

        let released = match permit {
            Some(permit) => {
                permit.send(driver);
                Ok(())
            }
            None => Err(DispatchError::DriverReturnFailure(driver.name().to_string())),
        };
        self.refresh_gauge();
        released
    }

    fn refresh_gauge(&self) {
        self.idle_gauge.set(self.pool.len() as i64);
    }
}

impl Drop for DriverLease {
    fn drop(&mut self) {
        let Some(mut driver) = self.driver.take() else {
            return;
        };

        driver.drop_off();
        match self.pool.try_put(driver) {
            Ok(()) => warn!("interrupted booking returned its driver to the idle pool"),
            Err(driver) => warn!(driver = %driver, "driver retired: idle pool unavailable"),
        }
        self.refresh_gauge();
    }
}
