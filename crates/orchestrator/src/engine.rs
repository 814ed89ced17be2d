//! Scan engine - runs a pipeline against a shared context
//!
//! Steps run strictly in order. Every phase races the engine's phase
//! timeout and the caller's cancellation token; a phase that loses is
//! dropped and its child token cancelled, and the scan moves on. Phase
//! failures never abort the scan, only caller cancellation does. A phase
//! that panics counts as having produced nothing.

use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use lanscope_common::{DiscoveredDevice, EngineConfig, ScanContext};

use crate::accumulator::ScanAccumulator;
use crate::pipeline::{ScanPhase, ScanPipeline};
use crate::progress::{PhaseProgress, ProgressCallback, ProgressTracker};

pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(30);

/// How a single phase run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed,
    Panicked,
    TimedOut,
    Cancelled,
}

pub struct ScanEngine {
    accumulator: Arc<ScanAccumulator>,
    phase_timeout: Duration,
}

impl ScanEngine {
    pub fn new() -> Self {
        Self {
            accumulator: Arc::new(ScanAccumulator::new()),
            phase_timeout: DEFAULT_PHASE_TIMEOUT,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new().with_phase_timeout(config.phase_timeout)
    }

    #[must_use]
    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    /// The store phases write into. Shared so callers can read partial
    /// results while a scan is running.
    pub fn accumulator(&self) -> &Arc<ScanAccumulator> {
        &self.accumulator
    }

    pub fn phase_timeout(&self) -> Duration {
        self.phase_timeout
    }

    /// Drop everything found so far.
    pub async fn reset(&self) {
        self.accumulator.reset().await;
    }

    /// Run every step of `pipeline` and return the devices sorted by
    /// address. `on_progress` receives non-decreasing overall progress and
    /// the display name of the phase that moved it. The final 1.0 is only
    /// reported when the pipeline ran to the end; a cancelled scan stops
    /// at whatever value it had reached.
    #[instrument(skip_all, fields(scan_id = %Uuid::new_v4()))]
    pub async fn scan<F>(
        &self,
        pipeline: &ScanPipeline,
        context: &ScanContext,
        on_progress: F,
        cancel: &CancellationToken,
    ) -> Vec<DiscoveredDevice>
    where
        F: Fn(f64, &str) + Send + Sync + 'static,
    {
        let total_weight = pipeline.total_weight();
        if total_weight <= 0.0 {
            debug!("pipeline carries no weight, nothing to run");
            return self.accumulator.sorted_snapshot().await;
        }

        let callback: ProgressCallback = Arc::new(on_progress);
        let tracker = ProgressTracker::new(
            pipeline
                .phases()
                .map(|p| (p.display_name().to_string(), p.weight())),
            Some(callback),
        );

        let started = Instant::now();
        info!(
            hosts = context.hosts.len(),
            steps = pipeline.steps.len(),
            "scan started"
        );

        let mut slot = 0usize;
        for step in &pipeline.steps {
            if cancel.is_cancelled() {
                break;
            }

            if step.runs_concurrently() {
                let runs = step.phases.iter().enumerate().map(|(i, phase)| {
                    self.run_phase(phase.as_ref(), context, tracker.phase(slot + i), cancel)
                });
                join_all(runs).await;
                slot += step.phases.len();
            } else {
                for phase in &step.phases {
                    if cancel.is_cancelled() {
                        break;
                    }
                    self.run_phase(phase.as_ref(), context, tracker.phase(slot), cancel)
                        .await;
                    slot += 1;
                }
            }
        }

        let devices = self.accumulator.sorted_snapshot().await;
        if cancel.is_cancelled() {
            info!(devices = devices.len(), elapsed = ?started.elapsed(), "scan cancelled");
        } else {
            tracker.finish("Complete");
            info!(devices = devices.len(), elapsed = ?started.elapsed(), "scan finished");
        }
        devices
    }

    async fn run_phase(
        &self,
        phase: &dyn ScanPhase,
        context: &ScanContext,
        progress: PhaseProgress,
        cancel: &CancellationToken,
    ) -> PhaseOutcome {
        let phase_cancel = cancel.child_token();
        let started = Instant::now();
        debug!(phase = phase.id(), "phase started");

        let execution =
            AssertUnwindSafe(phase.execute(context, &self.accumulator, &progress, &phase_cancel))
                .catch_unwind();
        let outcome = tokio::select! {
            result = execution => match result {
                Ok(()) => PhaseOutcome::Completed,
                Err(payload) => {
                    warn!(phase = phase.id(), panic = panic_message(payload.as_ref()), "phase panicked");
                    PhaseOutcome::Panicked
                }
            },
            _ = tokio::time::sleep(self.phase_timeout) => PhaseOutcome::TimedOut,
            _ = cancel.cancelled() => PhaseOutcome::Cancelled,
        };
        phase_cancel.cancel();

        let elapsed = started.elapsed();
        match outcome {
            PhaseOutcome::Completed => {
                progress.complete();
                info!(phase = phase.id(), ?elapsed, "phase finished");
            }
            PhaseOutcome::Panicked => {
                progress.complete();
            }
            PhaseOutcome::TimedOut => {
                progress.complete();
                warn!(phase = phase.id(), timeout = ?self.phase_timeout, "phase timed out");
            }
            PhaseOutcome::Cancelled => {
                info!(phase = phase.id(), ?elapsed, "phase cancelled");
            }
        }
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

impl Default for ScanEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lanscope_common::DeviceSource;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn context() -> ScanContext {
        ScanContext::new(
            vec!["10.0.0.1".into(), "10.0.0.2".into()],
            |ip| ip.starts_with("10.0.0."),
            None,
        )
    }

    /// Upserts fixed IPs, reporting progress per device.
    struct StaticPhase {
        id: &'static str,
        ips: Vec<&'static str>,
    }

    #[async_trait]
    impl ScanPhase for StaticPhase {
        fn id(&self) -> &str {
            self.id
        }
        fn display_name(&self) -> &str {
            self.id
        }
        fn weight(&self) -> f64 {
            1.0
        }
        async fn execute(
            &self,
            _context: &ScanContext,
            accumulator: &ScanAccumulator,
            progress: &PhaseProgress,
            _cancel: &CancellationToken,
        ) {
            for (i, ip) in self.ips.iter().enumerate() {
                accumulator
                    .upsert(DiscoveredDevice::new(*ip, DeviceSource::LocalProbe))
                    .await;
                progress.report_count(i + 1, self.ips.len());
                tokio::task::yield_now().await;
            }
        }
    }

    struct HangingPhase;

    #[async_trait]
    impl ScanPhase for HangingPhase {
        fn id(&self) -> &str {
            "hang"
        }
        fn display_name(&self) -> &str {
            "Hanging"
        }
        fn weight(&self) -> f64 {
            2.0
        }
        async fn execute(
            &self,
            _context: &ScanContext,
            _accumulator: &ScanAccumulator,
            progress: &PhaseProgress,
            _cancel: &CancellationToken,
        ) {
            progress.report(0.3);
            std::future::pending::<()>().await;
        }
    }

    struct FlagPhase(Arc<AtomicBool>);

    #[async_trait]
    impl ScanPhase for FlagPhase {
        fn id(&self) -> &str {
            "flag"
        }
        fn display_name(&self) -> &str {
            "Flag"
        }
        fn weight(&self) -> f64 {
            1.0
        }
        async fn execute(
            &self,
            _context: &ScanContext,
            _accumulator: &ScanAccumulator,
            _progress: &PhaseProgress,
            _cancel: &CancellationToken,
        ) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    struct PanickingPhase;

    #[async_trait]
    impl ScanPhase for PanickingPhase {
        fn id(&self) -> &str {
            "panic"
        }
        fn display_name(&self) -> &str {
            "Panicking"
        }
        fn weight(&self) -> f64 {
            1.0
        }
        async fn execute(
            &self,
            _context: &ScanContext,
            accumulator: &ScanAccumulator,
            _progress: &PhaseProgress,
            _cancel: &CancellationToken,
        ) {
            accumulator
                .upsert(DiscoveredDevice::new("10.0.0.7", DeviceSource::LocalProbe))
                .await;
            let empty: Vec<u8> = Vec::new();
            let index = accumulator.len().await + 2;
            let _ = empty[index];
        }
    }

    fn static_phase(id: &'static str, ips: Vec<&'static str>) -> Arc<dyn ScanPhase> {
        Arc::new(StaticPhase { id, ips })
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_phase_is_cut_off_and_scan_continues() {
        let ran_after = Arc::new(AtomicBool::new(false));
        let pipeline = ScanPipeline::new()
            .then(Arc::new(HangingPhase))
            .then(Arc::new(FlagPhase(ran_after.clone())));

        let engine = ScanEngine::new();
        let start = Instant::now();
        engine
            .scan(&pipeline, &context(), |_, _| {}, &CancellationToken::new())
            .await;
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_secs(28), "{elapsed:?}");
        assert!(elapsed <= Duration::from_secs(35), "{elapsed:?}");
        assert!(ran_after.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panicking_phase_does_not_abort_scan() {
        let ran_after = Arc::new(AtomicBool::new(false));
        let pipeline = ScanPipeline::new()
            .then(Arc::new(PanickingPhase))
            .then(Arc::new(FlagPhase(ran_after.clone())));

        let engine = Arc::new(ScanEngine::new());
        let scan = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .scan(&pipeline, &context(), |_, _| {}, &CancellationToken::new())
                    .await
            })
        };

        let devices = scan.await.expect("scan must survive a panicking phase");
        assert!(ran_after.load(Ordering::SeqCst));
        // What the phase merged before panicking stays.
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].ip, "10.0.0.7");
    }

    #[tokio::test]
    async fn test_panicking_phase_in_concurrent_step() {
        let pipeline = ScanPipeline::new().then_concurrent(vec![
            Arc::new(PanickingPhase),
            static_phase("x", vec!["10.0.0.3"]),
        ]);

        let devices = ScanEngine::new()
            .scan(&pipeline, &context(), |_, _| {}, &CancellationToken::new())
            .await;
        let ips: Vec<&str> = devices.iter().map(|d| d.ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.0.3", "10.0.0.7"]);
    }

    #[test]
    fn test_panic_message_extraction() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("boom"));
        assert_eq!(panic_message(owned.as_ref()), "boom");
        let fixed: Box<dyn Any + Send> = Box::new("static boom");
        assert_eq!(panic_message(fixed.as_ref()), "static boom");
        let other: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_monotonic_and_finishes_high() {
        let seen = Arc::new(Mutex::new(Vec::<f64>::new()));
        let sink = seen.clone();

        let hang: Arc<dyn ScanPhase> = Arc::new(HangingPhase);
        let pipeline = ScanPipeline::new()
            .then_concurrent(vec![
                static_phase("a", vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]),
                static_phase("b", vec!["10.0.0.4"]),
                hang,
            ])
            .then(static_phase("c", vec!["10.0.0.5", "10.0.0.6"]));

        let engine = ScanEngine::new().with_phase_timeout(Duration::from_secs(5));
        engine
            .scan(
                &pipeline,
                &context(),
                move |p, _| sink.lock().push(p),
                &CancellationToken::new(),
            )
            .await;

        let values = seen.lock().clone();
        assert!(!values.is_empty());
        assert!(values.windows(2).all(|w| w[0] <= w[1]), "{values:?}");
        assert!(*values.last().unwrap() > 0.9);
    }

    #[tokio::test]
    async fn test_concurrent_step_runs_every_phase() {
        let pipeline = ScanPipeline::new().then_concurrent(vec![
            static_phase("x", vec!["10.0.0.100", "10.0.0.2"]),
            static_phase("y", vec!["10.0.0.10", "10.0.0.2"]),
        ]);

        let engine = ScanEngine::new();
        let devices = engine
            .scan(&pipeline, &context(), |_, _| {}, &CancellationToken::new())
            .await;

        let ips: Vec<&str> = devices.iter().map(|d| d.ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.0.2", "10.0.0.10", "10.0.0.100"]);
    }

    #[tokio::test]
    async fn test_cancelled_scan_skips_remaining_steps() {
        let ran = Arc::new(AtomicBool::new(false));
        let pipeline = ScanPipeline::new().then(Arc::new(FlagPhase(ran.clone())));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let devices = ScanEngine::new()
            .scan(&pipeline, &context(), |_, _| {}, &cancel)
            .await;

        assert!(devices.is_empty());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_running_phase() {
        let pipeline = ScanPipeline::new().then(Arc::new(HangingPhase));
        let engine = ScanEngine::new();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        engine.scan(&pipeline, &context(), |_, _| {}, &cancel).await;
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_scan_never_reports_done() {
        let seen = Arc::new(Mutex::new(Vec::<f64>::new()));
        let sink = seen.clone();
        let pipeline = ScanPipeline::new().then(Arc::new(HangingPhase));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        ScanEngine::new()
            .scan(&pipeline, &context(), move |p, _| sink.lock().push(p), &cancel)
            .await;

        let values = seen.lock().clone();
        assert!(!values.is_empty());
        assert!(values.iter().all(|p| *p < 1.0), "{values:?}");
    }

    #[tokio::test]
    async fn test_weightless_pipeline_returns_snapshot() {
        let engine = ScanEngine::new();
        engine
            .accumulator()
            .upsert(DiscoveredDevice::new("10.0.0.9", DeviceSource::Ssdp))
            .await;

        let devices = engine
            .scan(&ScanPipeline::new(), &context(), |_, _| {}, &CancellationToken::new())
            .await;
        assert_eq!(devices.len(), 1);

        engine.reset().await;
        assert!(engine.accumulator().is_empty().await);
    }
}
