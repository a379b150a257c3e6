//! Bounded concurrency for uploads.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Caps how many uploads are in flight at once. Admission never waits:
/// when every slot is taken the caller is turned away immediately.
#[derive(Clone)]
pub struct AdmissionController {
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

/// One occupied upload slot. The slot is released when this is dropped, on
/// success, failure or cancellation alike.
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionController {
    pub fn new(max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        self.permits
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| AdmissionPermit { _permit: permit })
    }

    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}
