use std::io;
use std::time::Duration;

use thiserror::Error;

/// Reasons a [`LoadPlan`](crate::plan::LoadPlan) is refused before any thread exists.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlanError {
    #[error("load plan has no cores")]
    Empty,

    #[error("multiple definitions for CPU {0}")]
    DuplicateCore(usize),

    #[error("incorrect ratio {ratio} for CPU {core} (expected 0.0..=1.0)")]
    RatioOutOfRange { core: usize, ratio: f64 },

    #[error("all CPUs must have the same ratio (CPU {core} has {ratio}, expected {expected})")]
    NonUniformRatio { core: usize, ratio: f64, expected: f64 },

    #[error("interval must be positive, got {0:?}")]
    InvalidInterval(Duration),

    #[error("unknown CPU specification format: {0}")]
    BadTarget(String),

    #[error("could not get maximum frequency for CPU {0}")]
    UnknownFrequency(usize),
}

/// Every way a run can fail. All of them are fatal to the run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid load plan: {0}")]
    Plan(#[from] PlanError),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("calibration failed: {0}")]
    CalibrationFailed(String),

    #[error("CPU {core} is not available to this process")]
    CoreUnavailable { core: usize },

    #[error("could not set affinity for CPU {core}: {source}")]
    Affinity { core: usize, source: io::Error },

    #[error("could not go realtime on CPU {core}: {source}")]
    Scheduling { core: usize, source: io::Error },

    #[error("could not start thread for CPU {core}: {source}")]
    Spawn { core: usize, source: io::Error },

    #[error("signal handler could not be established: {0}")]
    SignalHandler(String),

    #[error("monotonic clock failure on CPU {core}: {source}")]
    Clock { core: usize, source: io::Error },

    #[error("worker thread for CPU {core} panicked")]
    WorkerPanicked { core: usize },

    #[error("control thread panicked")]
    ControlPanicked,
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
