use thiserror::Error;

use crate::models::booking::BookingId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("unknown region: {0}")]
    UnknownRegion(String),

    #[error("region {0} is shutting down")]
    RegionShuttingDown(String),

    #[error("region {0} is saturated")]
    RegionSaturated(String),

    #[error("booking {0} was cancelled while waiting for a driver")]
    DriverAcquisitionCancelled(BookingId),

    #[error("driver {0} could not be returned to the idle pool")]
    DriverReturnFailure(String),

    #[error("booking {0} was dropped before producing a result")]
    BookingAbandoned(BookingId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DispatchError {
    /// Admission refusals are expected under load and are not fatal.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            DispatchError::RegionShuttingDown(_) | DispatchError::RegionSaturated(_)
        )
    }
}
