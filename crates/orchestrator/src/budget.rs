//! Connection budget - admission control for sockets
//!
//! Caps how many network operations are in flight across every service,
//! independent of how many probe tasks exist. Callers `acquire()` before
//! opening a socket and `release()` when it is closed, or hold a
//! `BudgetPermit` that releases on drop.
//!
//! `release()` hands its slot to the oldest waiter whenever one exists,
//! even if the effective limit was lowered after that waiter queued. A
//! capacity check at release time would strand waiters forever once the
//! limit shrinks below the active count.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::throttle::LoadThrottle;

struct BudgetState {
    limit: usize,
    active: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

pub struct ConnectionBudget {
    state: Mutex<BudgetState>,
    throttle: Arc<LoadThrottle>,
}

impl ConnectionBudget {
    pub fn new(limit: usize) -> Self {
        Self::with_throttle(limit, Arc::new(LoadThrottle::new()))
    }

    pub fn with_throttle(limit: usize, throttle: Arc<LoadThrottle>) -> Self {
        Self {
            state: Mutex::new(BudgetState {
                limit: limit.max(1),
                active: 0,
                waiters: VecDeque::new(),
            }),
            throttle,
        }
    }

    /// Wait for a slot and claim it. Never fails; callers bound the wait
    /// with their own timeout if they need one.
    /// Waiters are served in arrival order: a caller only skips the queue
    /// when nobody is waiting.
    pub async fn acquire(&self) {
        let rx = {
            let mut state = self.state.lock();
            let limit = self.throttle.effective_limit(state.limit);
            if state.waiters.is_empty() && state.active < limit {
                state.active += 1;
                return;
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            // The limit may have grown since the queue formed.
            Self::admit_waiters(&mut state, limit);
            rx
        };

        let mut waiter = Waiter {
            budget: self,
            rx: Some(rx),
        };
        waiter.granted().await;
    }

    /// Return a slot. With waiters queued the slot passes straight to the
    /// oldest one and the active count stays put (one out, one in).
    pub fn release(&self) {
        let mut state = self.state.lock();
        while let Some(waiter) = state.waiters.pop_front() {
            // A closed receiver belongs to an acquire that was abandoned.
            if waiter.send(()).is_ok() {
                return;
            }
        }
        state.active = state.active.saturating_sub(1);
    }

    /// Wake every waiter and zero the count. Each woken waiter holds a
    /// slot afterwards, so `active_count()` equals the number woken.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let pending = std::mem::take(&mut state.waiters);
        let leaked = state.active;
        state.active = 0;
        for waiter in pending {
            if waiter.send(()).is_ok() {
                state.active += 1;
            }
        }
        warn!(leaked, resumed = state.active, "connection budget reset");
    }

    /// Acquire a slot tied to the returned guard's lifetime.
    pub async fn permit(&self) -> BudgetPermit<'_> {
        self.acquire().await;
        BudgetPermit { budget: self }
    }

    /// Change the configured limit. Existing holders keep their slots;
    /// queued waiters are admitted at once if the new limit leaves room.
    pub fn set_limit(&self, limit: usize) {
        let mut state = self.state.lock();
        debug!(from = state.limit, to = limit, "connection limit changed");
        state.limit = limit.max(1);
        let effective = self.throttle.effective_limit(state.limit);
        Self::admit_waiters(&mut state, effective);
    }

    /// Re-read the throttle after its level changed, admitting waiters if
    /// the effective limit grew.
    pub fn apply_throttle(&self) {
        let mut state = self.state.lock();
        let effective = self.throttle.effective_limit(state.limit);
        Self::admit_waiters(&mut state, effective);
    }

    /// Hand free headroom to queued waiters, oldest first.
    fn admit_waiters(state: &mut BudgetState, limit: usize) {
        while state.active < limit {
            let Some(waiter) = state.waiters.pop_front() else { break };
            if waiter.send(()).is_ok() {
                state.active += 1;
            }
        }
    }

    pub fn limit(&self) -> usize {
        self.state.lock().limit
    }

    /// Limit after load scaling.
    pub fn effective_limit(&self) -> usize {
        self.throttle.effective_limit(self.limit())
    }

    /// Slots currently held, for diagnostics.
    pub fn active_count(&self) -> usize {
        self.state.lock().active
    }

    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    pub fn throttle(&self) -> &Arc<LoadThrottle> {
        &self.throttle
    }
}

impl Default for ConnectionBudget {
    fn default() -> Self {
        Self::new(60)
    }
}

/// A queued acquire. Dropped before completion, it gives back any slot
/// that was handed to it in the meantime.
struct Waiter<'a> {
    budget: &'a ConnectionBudget,
    rx: Option<oneshot::Receiver<()>>,
}

impl Waiter<'_> {
    async fn granted(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            // Err means the budget itself went away; nothing left to wait for.
            let _ = rx.await;
        }
        self.rx = None;
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                self.budget.release();
            }
        }
    }
}

/// RAII slot; released on drop.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct BudgetPermit<'a> {
    budget: &'a ConnectionBudget,
}

impl Drop for BudgetPermit<'_> {
    fn drop(&mut self) {
        self.budget.release();
    }
}
