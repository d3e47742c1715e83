use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A rider waiting to be taken somewhere. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passenger {
    name: String,
    max_travel_delay_ms: u64,
}

impl Passenger {
    pub fn new(name: impl Into<String>, max_travel_delay_ms: u64) -> Self {
        Self {
            name: name.into(),
            max_travel_delay_ms,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_travel_delay(&self) -> Duration {
        Duration::from_millis(self.max_travel_delay_ms)
    }
}
