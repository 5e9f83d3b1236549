//! Controllable per-core CPU load.
//!
//! One worker thread per requested core, pinned and (optionally) real-time,
//! alternates absolute-deadline sleeps with calibrated bursts of busy work so
//! that each core spends the requested fraction of wall time busy.
//!
//! ```no_run
//! use cpu_hogs::{CpuHogs, LoadPlan, RunOptions};
//!
//! let plan = LoadPlan::uniform(&[0, 1], 0.25)?;
//! let hogs = CpuHogs::start(plan, RunOptions::default())?;
//! // ... run the experiment ...
//! let report = hogs.stop()?;
//! println!("{} loops/s", report.loops_per_second);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod affinity;
pub mod calibrate;
pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod frequency;
pub mod gate;
pub mod hogs;
pub mod plan;
pub mod termination;
pub mod work_unit;
pub mod worker;

pub use calibrate::{calibrate, Calibration};
pub use config::RunOptions;
pub use driver::{Driver, RunReport, TerminationCause};
pub use error::{EngineError, PlanError};
pub use frequency::CoreTarget;
pub use gate::{EngineState, Gate};
pub use hogs::CpuHogs;
pub use plan::{CoreLoadSpec, LoadPlan};
pub use termination::TerminationFlag;
pub use worker::{NativePlatform, Platform, WorkerStats};
