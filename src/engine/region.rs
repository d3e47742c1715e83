use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::dispatch::DispatchCore;
use crate::engine::booking::run_booking;
use crate::error::DispatchError;
use crate::models::booking::{Booking, BookingId, BookingResult};
use crate::models::passenger::Passenger;

/// An admitted booking, its reply channel and the admission slot it holds
/// until a worker has finished with it.
type Job = (
    Booking,
    oneshot::Sender<Result<BookingResult, DispatchError>>,
    OwnedSemaphorePermit,
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegionState {
    Accepting,
    ShuttingDown,
    Drained,
}

/// Counters owned by a region's admission path and its workers.
#[derive(Debug, Default)]
pub(crate) struct RegionStats {
    queued: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    awaiting_driver: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    rejected: AtomicUsize,
}

impl RegionStats {
    fn admit(&self) {
        self.queued.fetch_add(1, Ordering::SeqCst);
        self.awaiting_driver.fetch_add(1, Ordering::SeqCst);
    }

    fn revoke(&self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
        self.awaiting_driver.fetch_sub(1, Ordering::SeqCst);
    }

    fn start(&self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(active, Ordering::SeqCst);
    }

    fn finish(&self, succeeded: bool) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        if succeeded {
            self.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn leave_awaiting(&self) {
        self.awaiting_driver.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionSnapshot {
    pub name: String,
    pub capacity: usize,
    pub state: RegionState,
    pub queued: usize,
    pub active: usize,
    pub peak_active: usize,
    pub awaiting_driver: usize,
    pub completed: usize,
    pub failed: usize,
    pub rejected: usize,
}

/// Pending result of an admitted booking.
#[derive(Debug)]
pub struct BookingHandle {
    id: BookingId,
    rx: oneshot::Receiver<Result<BookingResult, DispatchError>>,
}

impl BookingHandle {
    pub fn id(&self) -> BookingId {
        self.id
    }
}

impl Future for BookingHandle {
    type Output = Result<BookingResult, DispatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(DispatchError::BookingAbandoned(id))))
    }
}

/// One geographic partition with its own bounded worker pool.
///
/// `capacity` workers execute bookings; a backlog of the same size holds
/// admitted bookings until a worker frees up. Admission is gated by
/// `2 * capacity` slots, so anything beyond that is refused immediately
/// rather than waiting at the door.
pub struct Region {
    name: String,
    capacity: usize,
    core: Arc<DispatchCore>,
    stats: Arc<RegionStats>,
    admission: Arc<Semaphore>,
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
    live_workers: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl Region {
    /// Must be called from within a tokio runtime; workers are spawned here.
    pub(crate) fn new(
        core: Arc<DispatchCore>,
        name: impl Into<String>,
        capacity: usize,
    ) -> Result<Self, DispatchError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DispatchError::InvalidConfig(
                "region name cannot be empty".to_string(),
            ));
        }
        if capacity == 0 {
            return Err(DispatchError::InvalidConfig(format!(
                "region {name} must allow at least one job"
            )));
        }

        let slots = capacity * 2;
        let admission = Arc::new(Semaphore::new(slots));
        // never full: every job in flight already holds an admission slot
        let (tx, rx) = mpsc::channel(slots);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let stats = Arc::new(RegionStats::default());
        let live_workers = Arc::new(AtomicUsize::new(capacity));
        let drained = Arc::new(Notify::new());

        for worker in 0..capacity {
            tokio::spawn(run_worker(
                WorkerContext {
                    region: name.clone(),
                    worker,
                    core: core.clone(),
                    stats: stats.clone(),
                    live_workers: live_workers.clone(),
                    drained: drained.clone(),
                },
                rx.clone(),
            ));
        }

        debug!(region = %name, capacity, "region started");

        Ok(Self {
            name,
            capacity,
            core,
            stats,
            admission,
            jobs: Mutex::new(Some(tx)),
            live_workers,
            drained,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admits a booking for `passenger`, or refuses it if the region is
    /// shutting down or both the workers and the backlog are full.
    pub fn book_passenger(&self, passenger: Passenger) -> Result<BookingHandle, DispatchError> {
        let mut booking = Booking::new(self.core.next_booking_id(), &self.name, passenger);

        // held across the send so a concurrent shutdown cannot slip in between
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = jobs.as_ref() else {
            booking.reject();
            return Err(self.refuse(&booking, DispatchError::RegionShuttingDown(self.name.clone())));
        };

        let Ok(slot) = self.admission.clone().try_acquire_owned() else {
            booking.reject();
            return Err(self.refuse(&booking, DispatchError::RegionSaturated(self.name.clone())));
        };

        let id = booking.id();
        let (tx, rx) = oneshot::channel();

        // counted before the send so a fast worker never sees them at zero
        self.stats.admit();
        self.core.metrics.bookings_awaiting_driver.inc();

        match sender.try_send((booking, tx, slot)) {
            Ok(()) => Ok(BookingHandle { id, rx }),
            Err(err) => {
                self.stats.revoke();
                self.core.metrics.bookings_awaiting_driver.dec();

                let (reason, (mut booking, _, _)) = match err {
                    TrySendError::Full(job) => {
                        (DispatchError::RegionSaturated(self.name.clone()), job)
                    }
                    TrySendError::Closed(job) => {
                        (DispatchError::RegionShuttingDown(self.name.clone()), job)
                    }
                };
                booking.reject();
                Err(self.refuse(&booking, reason))
            }
        }
    }

    /// Bookings admitted but still waiting for a free worker.
    pub fn booking_queue_length(&self) -> usize {
        self.stats.queued.load(Ordering::SeqCst)
    }

    pub fn active_jobs(&self) -> usize {
        self.stats.active.load(Ordering::SeqCst)
    }

    pub fn bookings_awaiting_driver(&self) -> usize {
        self.stats.awaiting_driver.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RegionState {
        let accepting = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();

        if accepting {
            RegionState::Accepting
        } else if self.live_workers.load(Ordering::SeqCst) > 0 {
            RegionState::ShuttingDown
        } else {
            RegionState::Drained
        }
    }

    /// Stops admitting bookings. Admitted work keeps running to completion.
    pub fn shutdown(&self) {
        let taken = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if taken.is_some() {
            info!(region = %self.name, queued = self.booking_queue_length(), "region shutting down");
        }
    }

    /// Resolves once every worker has exited. Only meaningful after
    /// [`Region::shutdown`]; an accepting region never drains.
    pub async fn drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.live_workers.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn snapshot(&self) -> RegionSnapshot {
        RegionSnapshot {
            name: self.name.clone(),
            capacity: self.capacity,
            state: self.state(),
            queued: self.booking_queue_length(),
            active: self.active_jobs(),
            peak_active: self.stats.peak_active.load(Ordering::SeqCst),
            awaiting_driver: self.bookings_awaiting_driver(),
            completed: self.stats.completed.load(Ordering::SeqCst),
            failed: self.stats.failed.load(Ordering::SeqCst),
            rejected: self.stats.rejected.load(Ordering::SeqCst),
        }
    }

    fn refuse(&self, booking: &Booking, reason: DispatchError) -> DispatchError {
        self.stats.rejected.fetch_add(1, Ordering::SeqCst);
        self.core.metrics.record_outcome(&self.name, "rejected");
        warn!(booking = %booking, reason = %reason, "booking rejected");
        self.core.log_event(booking, "Rejected booking");
        reason
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct WorkerContext {
    region: String,
    worker: usize,
    core: Arc<DispatchCore>,
    stats: Arc<RegionStats>,
    live_workers: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

async fn run_worker(ctx: WorkerContext, jobs: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>) {
    loop {
        let job = jobs.lock().await.recv().await;
        let Some((booking, reply, slot)) = job else {
            break;
        };

        ctx.stats.start();
        let started = Instant::now();
        let outcome = run_booking(ctx.core.clone(), &ctx.stats, booking).await;
        ctx.stats.finish(outcome.is_ok());
        drop(slot);

        let label = if outcome.is_ok() { "completed" } else { "failed" };
        ctx.core.metrics.record_outcome(&ctx.region, label);
        ctx.core
            .metrics
            .booking_duration_seconds
            .with_label_values(&[&ctx.region])
            .observe(started.elapsed().as_secs_f64());

        if let Err(err) = &outcome {
            warn!(region = %ctx.region, worker = ctx.worker, error = %err, "booking failed");
        }

        // the caller may have stopped waiting for the handle
        let _ = reply.send(outcome);
    }

    debug!(region = %ctx.region, worker = ctx.worker, "worker stopped");
    if ctx.live_workers.fetch_sub(1, Ordering::SeqCst) == 1 {
        ctx.drained.notify_waiters();
    }
}
