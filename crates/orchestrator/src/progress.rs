//! Weighted progress tracking
//!
//! Each phase owns a slot holding its own completion fraction. Overall
//! progress is the weight-averaged sum of the slots, so concurrent phases
//! reporting in any interleaving can only push the total forward. Values
//! handed to the callback never decrease.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Receives `(overall, phase display name)`. Invoked under the tracker's
/// lock; it must not call back into the tracker.
pub type ProgressCallback = Arc<dyn Fn(f64, &str) + Send + Sync>;

struct Slot {
    name: String,
    weight: f64,
    fraction: f64,
}

struct ProgressState {
    slots: Vec<Slot>,
    last_emitted: f64,
}

pub struct ProgressTracker {
    state: Mutex<ProgressState>,
    total_weight: f64,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    /// One slot per `(display name, weight)` pair, in pipeline order.
    pub fn new<I, S>(phases: I, callback: Option<ProgressCallback>) -> Arc<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let slots: Vec<Slot> = phases
            .into_iter()
            .map(|(name, weight)| Slot {
                name: name.into(),
                weight: weight.max(0.0),
                fraction: 0.0,
            })
            .collect();
        let total_weight = slots.iter().map(|s| s.weight).sum();

        Arc::new(Self {
            state: Mutex::new(ProgressState {
                slots,
                last_emitted: 0.0,
            }),
            total_weight,
            callback,
        })
    }

    /// A tracker with a single slot and no callback, for running a phase
    /// outside the engine.
    pub fn detached(name: &str) -> PhaseProgress {
        Self::new([(name, 1.0)], None).phase(0)
    }

    /// Handle for the phase in `slot`.
    pub fn phase(self: &Arc<Self>, slot: usize) -> PhaseProgress {
        PhaseProgress {
            tracker: Arc::clone(self),
            slot,
        }
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Overall progress in [0, 1] as last reported to the callback.
    pub fn current(&self) -> f64 {
        self.state.lock().last_emitted
    }

    fn report(&self, slot: usize, fraction: f64) {
        let mut state = self.state.lock();
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            return;
        };

        let Some(entry) = state.slots.get_mut(slot) else {
            return;
        };
        if fraction <= entry.fraction {
            return;
        }
        entry.fraction = fraction;

        if self.total_weight <= 0.0 {
            return;
        }
        let weighted: f64 = state.slots.iter().map(|s| s.weight * s.fraction).sum();
        let overall = (weighted / self.total_weight).min(1.0);
        if overall < state.last_emitted {
            return;
        }
        state.last_emitted = overall;

        if let Some(callback) = &self.callback {
            callback(overall, &state.slots[slot].name);
        }
    }

    /// Mark every slot done and emit 1.0.
    pub fn finish(&self, label: &str) {
        let mut state = self.state.lock();
        for slot in state.slots.iter_mut() {
            slot.fraction = 1.0;
        }
        state.last_emitted = 1.0;
        debug!("progress finished");
        if let Some(callback) = &self.callback {
            callback(1.0, label);
        }
    }
}

/// Per-phase progress reporter. Cheap to clone into worker futures.
#[derive(Clone)]
pub struct PhaseProgress {
    tracker: Arc<ProgressTracker>,
    slot: usize,
}

impl PhaseProgress {
    /// Report phase-local completion in [0, 1]. Values at or below what the
    /// phase already reported are ignored.
    pub fn report(&self, fraction: f64) {
        self.tracker.report(self.slot, fraction);
    }

    /// Report `done` out of `total` units of work.
    pub fn report_count(&self, done: usize, total: usize) {
        if total > 0 {
            self.report(done as f64 / total as f64);
        }
    }

    pub fn complete(&self) {
        self.report(1.0);
    }
}
