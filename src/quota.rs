use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::clock::BusinessClock;
use crate::store::Store;

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("daily mail limit exceeded ({current} sent + {requested} requested > {limit})")]
    Exceeded {
        current: i64,
        requested: i64,
        limit: i64,
    },

    #[error("could not verify daily quota: {0}")]
    Unavailable(String),
}

/// Recipients already counted on the business day containing `now`.
pub fn current_count(
    store: &dyn Store,
    clock: &BusinessClock,
    now: DateTime<Utc>,
) -> Result<i64, String> {
    let (start, end) = clock.day_bounds(clock.day_of(now));
    store.email_log_recipient_total(start, end)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitStatus {
    pub current_count: i64,
    pub limit: i64,
    pub remaining: i64,
}

/// Admits sends against the daily limit.
///
/// The count check and the reservation happen under one lock, and a reservation is held until
/// its attempt row is written, so concurrent requests in this process cannot overshoot the limit
/// between check and log.
pub struct QuotaGate {
    limit: i64,
    clock: BusinessClock,
    reserved: Mutex<i64>,
}

impl QuotaGate {
    pub fn new(limit: i64, clock: BusinessClock) -> Self {
        Self {
            limit,
            clock,
            reserved: Mutex::new(0),
        }
    }

    pub fn clock(&self) -> &BusinessClock {
        &self.clock
    }

    pub fn status(&self, store: &dyn Store, now: DateTime<Utc>) -> Result<LimitStatus, String> {
        let current = current_count(store, &self.clock, now)?;
        Ok(LimitStatus {
            current_count: current,
            limit: self.limit,
            remaining: self.limit - current,
        })
    }

    /// Admit `requested` recipients or refuse. Nothing is reserved on refusal.
    pub fn admit(
        self: &Arc<Self>,
        store: &dyn Store,
        now: DateTime<Utc>,
        requested: i64,
    ) -> Result<Reservation, QuotaError> {
        let mut reserved = self.reserved.lock().unwrap_or_else(|e| e.into_inner());
        let current = current_count(store, &self.clock, now).map_err(QuotaError::Unavailable)?;

        if current + *reserved + requested > self.limit {
            return Err(QuotaError::Exceeded {
                current: current + *reserved,
                requested,
                limit: self.limit,
            });
        }

        *reserved += requested;
        Ok(Reservation {
            gate: Arc::clone(self),
            amount: requested,
        })
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> i64 {
        *self.reserved.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Capacity held for one admitted send. Released on drop, which must come after the attempt row
/// has been written.
#[derive(Debug)]
pub struct Reservation {
    gate: Arc<QuotaGate>,
    amount: i64,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut reserved = self.gate.reserved.lock().unwrap_or_else(|e| e.into_inner());
        *reserved -= self.amount;
    }
}

impl std::fmt::Debug for QuotaGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaGate")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}
