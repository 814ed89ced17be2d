//! Orchestrator - scan pipeline execution and shared resource control
//!
//! Hosts the pieces every probe and phase leans on: the connection budget
//! that caps open sockets, the load throttle scaling it, the accumulator
//! phases merge into, and the engine that drives a pipeline of phases.

mod accumulator;
mod budget;
mod engine;
mod pipeline;
mod progress;
mod rtt;
mod stream;
mod throttle;

pub use accumulator::ScanAccumulator;
pub use budget::{BudgetPermit, ConnectionBudget};
pub use engine::{PhaseOutcome, ScanEngine, DEFAULT_PHASE_TIMEOUT};
pub use pipeline::{ScanPhase, ScanPipeline, ScanStep};
pub use progress::{PhaseProgress, ProgressCallback, ProgressTracker};
pub use rtt::RttTracker;
pub use stream::ResultStream;
pub use throttle::{LoadLevel, LoadThrottle};
