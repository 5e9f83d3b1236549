use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::config::RunOptions;
use crate::driver::{Driver, RunReport};
use crate::error::{EngineError, Result};
use crate::plan::LoadPlan;
use crate::termination::TerminationFlag;

/// A load run in the background, owned by whoever started it.
///
/// The driver gets its own control thread; [`stop`](CpuHogs::stop) raises
/// the termination flag and joins it. Dropping a running handle does the same.
/// Handle-managed runs never install signal handlers.
pub struct CpuHogs {
    termination: TerminationFlag,
    control: Option<JoinHandle<Result<RunReport>>>,
}

impl CpuHogs {
    pub fn start(plan: LoadPlan, options: RunOptions) -> Result<Self> {
        let options = RunOptions {
            handle_signals: false,
            ..options
        };
        options.validate()?;

        let core = plan.specs()[0].core;
        let termination = TerminationFlag::new();
        let driver = Driver::with_termination(options, termination.clone());
        let control = thread::Builder::new()
            .name("cpu-hogs-control".into())
            .spawn(move || driver.run(&plan))
            .map_err(|source| EngineError::Spawn { core, source })?;

        debug!("load started in background");
        Ok(Self {
            termination,
            control: Some(control),
        })
    }

    /// True until the run has finished, for whatever reason.
    pub fn is_running(&self) -> bool {
        self.control
            .as_ref()
            .is_some_and(|control| !control.is_finished())
    }

    /// Requests termination and waits for the run to wind down.
    pub fn stop(mut self) -> Result<RunReport> {
        self.termination.request();
        self.join()
    }

    /// Waits for the run to end on its own (duration elapsed or failure).
    pub fn wait(mut self) -> Result<RunReport> {
        self.join()
    }

    fn join(&mut self) -> Result<RunReport> {
        match self.control.take() {
            Some(control) => control.join().map_err(|_| EngineError::ControlPanicked)?,
            None => Err(EngineError::ControlPanicked),
        }
    }
}

impl Drop for CpuHogs {
    fn drop(&mut self) {
        if let Some(control) = self.control.take() {
            self.termination.request();
            let _ = control.join();
        }
    }
}
