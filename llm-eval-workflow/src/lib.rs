//! Task/SubTask execution engine.
//!
//! [`processor`] exposes the orchestrator contract and its two scheduling
//! backends. Both share [`controller`] for selection, [`evaluators`] for
//! scoring and [`aggregator`] for task roll-up, so they differ only in how
//! claimed work reaches an executor.

pub mod aggregator;
pub mod config;
pub mod controller;
pub mod evaluators;
pub mod expansion;
pub mod processor;

pub use aggregator::TaskAggregator;
pub use config::{BackendKind, ProcessorConfig};
pub use controller::{ConcurrencyController, DependencyState, DispatchReport};
pub use evaluators::{
    EvaluationContext, EvaluationError, EvaluationOutcome, EvaluatorEngine, ScoringStrategy,
};
pub use expansion::expand_task;
pub use processor::{
    PollingProcessor, ProcessSubTaskOutcome, ProcessTaskOutcome, Processor, ProcessorCore,
    ProcessorStats, ProcessorStatsSnapshot, QueueProcessor,
};
