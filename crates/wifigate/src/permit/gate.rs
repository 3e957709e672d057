//! Admission gate: a counting limiter with explicit release.
//!
//! Built on [`tokio::sync::Semaphore`], which queues waiters fairly and hands
//! each returned permit to the oldest one. Permits are forgotten on acquire and
//! added back on [`AdmissionGate::release`], so a permit can outlive the call
//! that took it. The holder count is kept alongside so an unmatched release is
//! rejected instead of inflating the semaphore.
//!
//! Invariant (under the holders lock): `available + holders <= capacity`, with
//! equality whenever no granted permit is still being recorded.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::{Semaphore, SemaphorePermit, TryAcquireError};

use crate::error::{AdmitError, ContractViolation};

/// Point-in-time view of the gate counters, read under one lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateCounts {
    pub capacity: usize,
    pub available: usize,
    pub holders: usize,
    pub waiting: usize,
}

pub struct AdmissionGate {
    capacity: usize,
    semaphore: Semaphore,
    holders: Mutex<usize>,
    waiting: AtomicUsize,
}

/// Counts one queued acquire for as long as it is pending.
struct Queued<'a>(&'a AtomicUsize);

impl<'a> Queued<'a> {
    fn enter(waiting: &'a AtomicUsize) -> Self {
        waiting.fetch_add(1, Ordering::AcqRel);
        Self(waiting)
    }
}

impl Drop for Queued<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            semaphore: Semaphore::new(capacity),
            holders: Mutex::new(0),
            waiting: AtomicUsize::new(0),
        }
    }

    // Critical sections never panic mid-update, so a poisoned lock still guards
    // a consistent count.
    fn lock_holders(&self) -> MutexGuard<'_, usize> {
        self.holders.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Admission gate mutex poisoned - recovering state");
            poisoned.into_inner()
        })
    }

    fn record_grant(&self, permit: SemaphorePermit<'_>) {
        let mut holders = self.lock_holders();
        permit.forget();
        *holders += 1;
    }

    /// Wait for a permit.
    ///
    /// Dropping the returned future before it completes gives up the place in
    /// the queue without consuming a permit.
    pub async fn acquire(&self) -> Result<(), AdmitError> {
        let permit = match self.semaphore.try_acquire() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(AdmitError::Closed),
            Err(TryAcquireError::NoPermits) => {
                let _queued = Queued::enter(&self.waiting);
                self.semaphore
                    .acquire()
                    .await
                    .map_err(|_| AdmitError::Closed)?
            }
        };
        self.record_grant(permit);
        Ok(())
    }

    /// Take a permit only if one is free. Never overtakes queued callers: while
    /// anyone waits, returned permits go to them and none show as available.
    pub fn try_acquire(&self) -> bool {
        match self.semaphore.try_acquire() {
            Ok(permit) => {
                self.record_grant(permit);
                true
            }
            Err(_) => false,
        }
    }

    /// Return a permit. Fails without touching the counters if nobody holds one.
    pub fn release(&self) -> Result<(), ContractViolation> {
        let mut holders = self.lock_holders();
        if *holders == 0 {
            tracing::error!(
                capacity = self.capacity,
                "Permit released without a matching acquire"
            );
            return Err(ContractViolation::GateOverRelease {
                capacity: self.capacity,
            });
        }

        *holders -= 1;
        self.semaphore.add_permits(1);
        Ok(())
    }

    /// Reject all queued and future acquires with [`AdmitError::Closed`].
    ///
    /// Current holders keep their permits and may still release them.
    /// Returns the number of waiters queued at the time of closing.
    pub fn close(&self) -> usize {
        let woken = self.waiting();
        self.semaphore.close();
        tracing::info!(woken, "Admission gate closed");
        woken
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Non-authoritative: may be stale as soon as it returns. Logging only.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn holders(&self) -> usize {
        *self.lock_holders()
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn counts(&self) -> GateCounts {
        let holders = self.lock_holders();
        GateCounts {
            capacity: self.capacity,
            available: self.semaphore.available_permits(),
            holders: *holders,
            waiting: self.waiting(),
        }
    }
}
