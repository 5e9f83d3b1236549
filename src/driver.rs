//! Run lifecycle: validate, calibrate, start the workers, wait for a
//! termination request, shut down, join, report.

use std::sync::{mpsc, Arc};
use std::thread::{self, Scope};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::affinity;
use crate::calibrate::{self, Calibration};
use crate::config::RunOptions;
use crate::error::{EngineError, Result};
use crate::plan::LoadPlan;
use crate::termination::{self, TerminationFlag};
use crate::worker::{NativePlatform, Platform, RunContext, WorkerConfig, WorkerHandle, WorkerStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationCause {
    /// The termination flag was raised, by a signal or by a handle.
    Requested,
    /// The configured run duration elapsed.
    DeadlineReached,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub loops_per_second: u64,
    pub sync: bool,
    pub interval: Duration,
    pub ratio: f64,
    pub cause: TerminationCause,
    pub elapsed: Duration,
    pub workers: Vec<WorkerStats>,
}

pub struct Driver {
    options: RunOptions,
    termination: TerminationFlag,
    platform: Arc<dyn Platform>,
}

impl Driver {
    pub fn new(options: RunOptions) -> Self {
        Self::with_termination(options, TerminationFlag::new())
    }

    /// A driver that stops when `termination` is raised.
    pub fn with_termination(options: RunOptions, termination: TerminationFlag) -> Self {
        Self {
            options,
            termination,
            platform: Arc::new(NativePlatform),
        }
    }

    /// Runs workers on `platform` instead of the native one.
    pub fn with_platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = platform;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Handle for asking a running driver to stop.
    pub fn termination(&self) -> TerminationFlag {
        self.termination.clone()
    }

    /// Executes `plan` until termination is requested or the configured
    /// duration elapses. Blocks the calling thread, which acts as the
    /// control thread for the run.
    pub fn run(&self, plan: &LoadPlan) -> Result<RunReport> {
        let result = self.execute(plan);
        match &result {
            Ok(_) => info!("return = 0"),
            Err(err) => {
                error!("{err}");
                info!("return = 1");
            }
        }
        result
    }

    fn execute(&self, plan: &LoadPlan) -> Result<RunReport> {
        self.options.validate()?;
        check_cores(plan)?;
        self.echo(plan);

        if self.options.handle_signals {
            termination::install_handler(self.termination.clone())?;
        }

        let first = plan.specs()[0].core;
        let calibration =
            calibrate::calibrate_on(first, self.options.realtime, self.options.calibration_target)?;

        let ctx = RunContext::new(
            plan.len(),
            self.options.sync,
            self.termination.clone(),
            Arc::clone(&self.platform),
        );
        thread::scope(|scope| self.supervise(scope, plan, &calibration, &ctx))
    }

    fn echo(&self, plan: &LoadPlan) {
        info!("syncing: {}", if self.options.sync { "on" } else { "off" });
        info!("interval: {:?}", plan.interval());
        info!(
            "cpufreq use: {}",
            if plan.use_frequency_scaling_hint() { "yes" } else { "no" }
        );
        for spec in plan.specs() {
            info!("CPU {} ratio = {:.3}", spec.core, spec.ratio);
        }
        debug!("{} of {} CPUs loaded", plan.len(), num_cpus::get());
    }

    fn supervise<'scope, 'env>(
        &self,
        scope: &'scope Scope<'scope, 'env>,
        plan: &LoadPlan,
        calibration: &Calibration,
        ctx: &'env RunContext,
    ) -> Result<RunReport> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let mut workers = Vec::with_capacity(plan.len());
        let mut failure = None;

        for spec in plan.specs() {
            let config = WorkerConfig {
                core: spec.core,
                ratio: spec.ratio,
                interval: plan.interval(),
                realtime: self.options.realtime,
                loops_per_second: calibration.loops_per_second,
            };
            match WorkerHandle::spawn(scope, config, ctx, ready_tx.clone()) {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        drop(ready_tx);

        let mut reported = 0;
        while reported < workers.len() {
            match ready_rx.recv() {
                Ok((_, Ok(()))) => reported += 1,
                Ok((core, Err(err))) => {
                    debug!(core, "worker setup failed");
                    reported += 1;
                    failure.get_or_insert(err);
                }
                // a worker died before reporting, joining will say which
                Err(_) => break,
            }
        }

        if failure.is_some() || reported < workers.len() {
            ctx.latch.release(false);
            let (_, join_failure) = join_all(workers);
            return Err(failure.or(join_failure).unwrap_or(EngineError::WorkerPanicked {
                core: plan.specs()[0].core,
            }));
        }

        ctx.latch.release(true);
        info!("{} workers started", workers.len());

        let started = Instant::now();
        let cause = self.wait_for_termination(started);
        match cause {
            TerminationCause::Requested => info!("termination requested"),
            TerminationCause::DeadlineReached => info!("run duration elapsed"),
        }

        ctx.state.begin_shutdown();
        let (stats, join_failure) = join_all(workers);
        info!("threads joined");
        if let Some(err) = join_failure {
            return Err(err);
        }

        Ok(RunReport {
            loops_per_second: calibration.loops_per_second,
            sync: self.options.sync,
            interval: plan.interval(),
            ratio: plan.ratio(),
            cause,
            elapsed: started.elapsed(),
            workers: stats,
        })
    }

    fn wait_for_termination(&self, started: Instant) -> TerminationCause {
        loop {
            if self.termination.is_requested() {
                return TerminationCause::Requested;
            }
            let mut nap = self.options.poll_period;
            if let Some(duration) = self.options.duration {
                let elapsed = started.elapsed();
                if elapsed >= duration {
                    return TerminationCause::DeadlineReached;
                }
                nap = nap.min(duration - elapsed);
            }
            thread::sleep(nap);
        }
    }
}

fn check_cores(plan: &LoadPlan) -> Result<()> {
    let first = plan.specs()[0].core;
    let allowed =
        affinity::allowed_cores().map_err(|source| EngineError::Affinity { core: first, source })?;
    if let Some(core) = plan.cores().find(|core| !allowed.contains(core)) {
        return Err(EngineError::CoreUnavailable { core });
    }
    Ok(())
}

fn join_all(workers: Vec<WorkerHandle<'_>>) -> (Vec<WorkerStats>, Option<EngineError>) {
    let mut stats = Vec::with_capacity(workers.len());
    let mut failure = None;
    for worker in workers {
        let core = worker.core();
        match worker.join() {
            Ok(worker_stats) => stats.push(worker_stats),
            Err(err) => {
                warn!(core, "worker failed: {err}");
                failure.get_or_insert(err);
            }
        }
    }
    (stats, failure)
}
