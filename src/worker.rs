//! Per-core load workers.
//!
//! A worker pins itself to its core, optionally joins the real-time class,
//! reports to the driver and waits for the go signal. Every cycle it checks
//! the engine state (meeting its peers at the barrier when syncing), sleeps
//! to an absolute deadline and then burns enough work units to make up the
//! target ratio over the idle time it actually got.

use std::io;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Barrier, Condvar, Mutex};
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error};

use crate::affinity;
use crate::clock;
use crate::error::{EngineError, Result};
use crate::gate::EngineState;
use crate::termination::TerminationFlag;
use crate::work_unit::run_units;

/// Cap on `ratio / (1 - ratio)`, reached at ratio 0.99. Past that point the
/// multiplier turns sleep jitter into whole extra intervals of busy time.
pub const MAX_CATCH_UP_FACTOR: f64 = 99.0;

/// Busy-to-idle multiplier that realizes `ratio` over one cycle.
pub fn catch_up_factor(ratio: f64) -> f64 {
    if ratio <= 0.0 {
        0.0
    } else if ratio >= 1.0 {
        MAX_CATCH_UP_FACTOR
    } else {
        (ratio / (1.0 - ratio)).min(MAX_CATCH_UP_FACTOR)
    }
}

/// Work units owed after idling for `idle`.
pub fn busy_units(loops_per_second: u64, idle: Duration, ratio: f64) -> u64 {
    (units_in(loops_per_second, idle) * catch_up_factor(ratio)) as u64
}

fn units_in(loops_per_second: u64, span: Duration) -> f64 {
    loops_per_second as f64 * span.as_secs_f64()
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub core: usize,
    pub ratio: f64,
    pub interval: Duration,
    pub realtime: bool,
    pub loops_per_second: u64,
}

/// What one worker did over the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkerStats {
    pub core: usize,
    pub cycles: u64,
    pub units: u64,
    pub busy: Duration,
    pub idle: Duration,
}

impl WorkerStats {
    /// Share of the measured time spent busy.
    pub fn realized_ratio(&self) -> f64 {
        let total = (self.busy + self.idle).as_secs_f64();
        if total == 0.0 {
            0.0
        } else {
            self.busy.as_secs_f64() / total
        }
    }
}

/// What a worker asks of the operating system.
pub trait Platform: Send + Sync {
    /// Places the calling thread on `config.core`, in the real-time class
    /// when `config.realtime` is set.
    fn configure(&self, config: &WorkerConfig) -> Result<()>;

    /// The idle phase of one cycle on `core`.
    fn idle(&self, core: usize, interval: Duration) -> io::Result<()>;
}

/// Affinity and `SCHED_FIFO` through the kernel, idling on the monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePlatform;

impl Platform for NativePlatform {
    fn configure(&self, config: &WorkerConfig) -> Result<()> {
        let core = config.core;
        affinity::pin_current_thread(core)
            .map_err(|source| EngineError::Affinity { core, source })?;
        if config.realtime {
            affinity::promote_current_thread()
                .map_err(|source| EngineError::Scheduling { core, source })?;
        }
        Ok(())
    }

    fn idle(&self, _core: usize, interval: Duration) -> io::Result<()> {
        clock::sleep_for(interval)
    }
}

/// One-shot start signal: workers block on it until the driver has seen
/// every worker configure successfully, or decides to abort.
#[derive(Debug, Default)]
pub struct StartLatch {
    decision: Mutex<Option<bool>>,
    decided: Condvar,
}

impl StartLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self, proceed: bool) {
        let mut decision = self.decision.lock().unwrap_or_else(|p| p.into_inner());
        *decision = Some(proceed);
        self.decided.notify_all();
    }

    /// Blocks until released; `true` means start the duty cycle.
    pub fn wait(&self) -> bool {
        let mut decision = self.decision.lock().unwrap_or_else(|p| p.into_inner());
        loop {
            if let Some(proceed) = *decision {
                return proceed;
            }
            decision = self.decided.wait(decision).unwrap_or_else(|p| p.into_inner());
        }
    }
}

/// Everything the workers of one run share. Owned by the driver.
pub struct RunContext {
    pub state: EngineState,
    pub barrier: Option<Barrier>,
    pub latch: StartLatch,
    pub termination: TerminationFlag,
    pub platform: Arc<dyn Platform>,
}

impl RunContext {
    pub fn new(
        workers: usize,
        sync: bool,
        termination: TerminationFlag,
        platform: Arc<dyn Platform>,
    ) -> Self {
        Self {
            state: EngineState::new(),
            barrier: sync.then(|| Barrier::new(workers)),
            latch: StartLatch::new(),
            termination,
            platform,
        }
    }
}

/// Outcome of a worker's affinity and scheduling setup.
pub type SetupReport = (usize, Result<()>);

pub struct WorkerHandle<'scope> {
    config: WorkerConfig,
    thread: ScopedJoinHandle<'scope, Result<WorkerStats>>,
}

impl<'scope> WorkerHandle<'scope> {
    /// Starts the worker thread. It reports its setup on `ready` and then
    /// waits on the context's start latch.
    pub fn spawn<'env>(
        scope: &'scope Scope<'scope, 'env>,
        config: WorkerConfig,
        ctx: &'env RunContext,
        ready: Sender<SetupReport>,
    ) -> Result<Self> {
        let core = config.core;
        let thread = thread::Builder::new()
            .name(format!("hog-cpu{core}"))
            .spawn_scoped(scope, move || {
                let setup = ctx.platform.configure(&config);
                let configured = setup.is_ok();
                // a closed channel means the driver already gave up
                let _ = ready.send((core, setup));
                drop(ready);

                if !configured || !ctx.latch.wait() {
                    debug!(core, "worker released without starting");
                    return Ok(WorkerStats {
                        core,
                        ..WorkerStats::default()
                    });
                }
                Worker::new(config, ctx).run()
            })
            .map_err(|source| EngineError::Spawn { core, source })?;

        Ok(Self { config, thread })
    }

    pub fn core(&self) -> usize {
        self.config.core
    }

    pub fn join(self) -> Result<WorkerStats> {
        let core = self.config.core;
        self.thread
            .join()
            .map_err(|_| EngineError::WorkerPanicked { core })?
    }
}

struct Worker<'a> {
    config: WorkerConfig,
    ctx: &'a RunContext,
    stats: WorkerStats,
}

impl<'a> Worker<'a> {
    fn new(config: WorkerConfig, ctx: &'a RunContext) -> Self {
        Self {
            config,
            ctx,
            stats: WorkerStats {
                core: config.core,
                ..WorkerStats::default()
            },
        }
    }

    fn run(mut self) -> Result<WorkerStats> {
        let core = self.config.core;
        let ctx = self.ctx;
        let barrier = ctx.barrier.as_ref();
        let mut failure = None;
        debug!(core, ratio = self.config.ratio, "worker started");

        loop {
            if ctx.state.observe(barrier) {
                break;
            }
            if failure.is_some() {
                // keep meeting the peers at the barrier until they see the stop too
                continue;
            }
            if let Err(source) = self.cycle() {
                let err = EngineError::Clock { core, source };
                error!(core, "{err}");
                ctx.termination.request();
                if barrier.is_none() {
                    return Err(err);
                }
                failure = Some(err);
            }
        }

        debug!(core, cycles = self.stats.cycles, "worker exiting");
        match failure {
            Some(err) => Err(err),
            None => Ok(self.stats),
        }
    }

    fn cycle(&mut self) -> io::Result<()> {
        let WorkerConfig {
            core,
            ratio,
            interval,
            loops_per_second,
            ..
        } = self.config;

        let units = if ratio >= 1.0 {
            // no idle phase at all, stay busy until the next check
            units_in(loops_per_second, interval) as u64
        } else {
            let start = Instant::now();
            self.ctx.platform.idle(core, interval)?;
            let idle = start.elapsed();
            self.stats.idle += idle;
            busy_units(loops_per_second, idle, ratio)
        };

        let start = Instant::now();
        run_units(units);
        if units > 0 {
            self.stats.busy += start.elapsed();
        }
        self.stats.units += units;
        self.stats.cycles += 1;
        Ok(())
    }
}
