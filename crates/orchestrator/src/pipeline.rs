//! Scan phases and the pipeline that orders them

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use lanscope_common::ScanContext;

use crate::accumulator::ScanAccumulator;
use crate::progress::PhaseProgress;

/// One discovery technique the engine can schedule.
///
/// Phases keep no state between runs. Everything they find goes into the
/// accumulator; `cancel` fires on caller stop or when the engine's phase
/// timeout expires, and phases should wind down promptly when it does.
#[async_trait]
pub trait ScanPhase: Send + Sync {
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Relative share of overall progress.
    fn weight(&self) -> f64;

    async fn execute(
        &self,
        context: &ScanContext,
        accumulator: &ScanAccumulator,
        progress: &PhaseProgress,
        cancel: &CancellationToken,
    );
}

/// A group of phases. A concurrent step starts all of them together; either
/// way the step finishes before the next one begins.
#[derive(Clone)]
pub struct ScanStep {
    pub phases: Vec<Arc<dyn ScanPhase>>,
    pub concurrent: bool,
}

impl ScanStep {
    pub fn single(phase: Arc<dyn ScanPhase>) -> Self {
        Self {
            phases: vec![phase],
            concurrent: false,
        }
    }

    pub fn concurrent(phases: Vec<Arc<dyn ScanPhase>>) -> Self {
        Self {
            phases,
            concurrent: true,
        }
    }

    /// Runs its phases together rather than one after another.
    pub fn runs_concurrently(&self) -> bool {
        self.concurrent && self.phases.len() > 1
    }
}

#[derive(Clone, Default)]
pub struct ScanPipeline {
    pub steps: Vec<ScanStep>,
}

impl ScanPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step holding one phase.
    #[must_use]
    pub fn then(mut self, phase: Arc<dyn ScanPhase>) -> Self {
        self.steps.push(ScanStep::single(phase));
        self
    }

    /// Append a step whose phases run concurrently.
    #[must_use]
    pub fn then_concurrent(mut self, phases: Vec<Arc<dyn ScanPhase>>) -> Self {
        if !phases.is_empty() {
            self.steps.push(ScanStep::concurrent(phases));
        }
        self
    }

    /// Every phase in execution order.
    pub fn phases(&self) -> impl Iterator<Item = &Arc<dyn ScanPhase>> + '_ {
        self.steps.iter().flat_map(|s| s.phases.iter())
    }

    pub fn total_weight(&self) -> f64 {
        self.phases().map(|p| p.weight().max(0.0)).sum()
    }

    pub fn phase_ids(&self) -> Vec<String> {
        self.phases().map(|p| p.id().to_string()).collect()
    }
}

impl std::fmt::Debug for ScanPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let steps: Vec<Vec<&str>> = self
            .steps
            .iter()
            .map(|s| s.phases.iter().map(|p| p.id()).collect())
            .collect();
        f.debug_struct("ScanPipeline").field("steps", &steps).finish()
    }
}
