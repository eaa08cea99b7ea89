//! Bounded execution pools
//!
//! A pool admits at most `max_size` concurrent executions. It starts with
//! `core_size` slots and grows one slot at a time, up to the maximum, whenever
//! a caller finds every slot taken. Callers beyond the bound queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::debug;

use crate::errors::DeployError;

/// Core and maximum pool sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolBounds {
    pub core_size: usize,
    pub max_size: usize,
}

impl Default for PoolBounds {
    fn default() -> Self {
        Self {
            core_size: 1,
            max_size: 10,
        }
    }
}

impl PoolBounds {
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.max_size == 0 {
            return Err(DeployError::config("Pool max size must be at least 1"));
        }
        if self.core_size > self.max_size {
            return Err(DeployError::config(format!(
                "Pool core size {} exceeds max size {}",
                self.core_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// A named, bounded pool of execution slots
#[derive(Debug)]
pub struct WorkerPool {
    name: &'static str,
    bounds: PoolBounds,
    permits: Arc<Semaphore>,
    granted: AtomicUsize,
}

impl WorkerPool {
    pub fn new(name: &'static str, bounds: PoolBounds) -> Result<Self, DeployError> {
        bounds.validate()?;
        Ok(Self {
            name,
            bounds,
            permits: Arc::new(Semaphore::new(bounds.core_size)),
            granted: AtomicUsize::new(bounds.core_size),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn bounds(&self) -> PoolBounds {
        self.bounds
    }

    /// Slots created so far
    pub fn size(&self) -> usize {
        self.granted.load(Ordering::SeqCst)
    }

    /// Wait for a slot; the slot is returned when the permit drops
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, DeployError> {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => {
                return Err(DeployError::Cancelled(format!("{} pool closed", self.name)))
            }
            Err(TryAcquireError::NoPermits) => {}
        }

        let max = self.bounds.max_size;
        if self
            .granted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .is_ok()
        {
            self.permits.add_permits(1);
            debug!("{} pool grew to {} slots", self.name, self.size());
        }

        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DeployError::Cancelled(format!("{} pool closed", self.name)))
    }
}
