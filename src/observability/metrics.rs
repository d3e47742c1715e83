use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub bookings_total: IntCounterVec,
    pub bookings_awaiting_driver: IntGauge,
    pub idle_drivers: IntGauge,
    pub booking_duration_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let bookings_total = IntCounterVec::new(
            Opts::new("bookings_total", "Total bookings by region and outcome"),
            &["region", "outcome"],
        )
        .expect("valid bookings_total metric");

        let bookings_awaiting_driver = IntGauge::new(
            "bookings_awaiting_driver",
            "Admitted bookings that do not hold a driver yet",
        )
        .expect("valid bookings_awaiting_driver metric");

        let idle_drivers = IntGauge::new("idle_drivers", "Drivers waiting in the idle pool")
            .expect("valid idle_drivers metric");

        let booking_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "booking_duration_seconds",
                "Wall time from worker pickup to booking completion in seconds",
            ),
            &["region"],
        )
        .expect("valid booking_duration_seconds metric");

        registry
            .register(Box::new(bookings_total.clone()))
            .expect("register bookings_total");
        registry
            .register(Box::new(bookings_awaiting_driver.clone()))
            .expect("register bookings_awaiting_driver");
        registry
            .register(Box::new(idle_drivers.clone()))
            .expect("register idle_drivers");
        registry
            .register(Box::new(booking_duration_seconds.clone()))
            .expect("register booking_duration_seconds");

        Self {
            registry,
            bookings_total,
            bookings_awaiting_driver,
            idle_drivers,
            booking_duration_seconds,
        }
    }

    pub fn record_outcome(&self, region: &str, outcome: &str) {
        self.bookings_total
            .with_label_values(&[region, outcome])
            .inc();
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
