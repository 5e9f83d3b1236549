//! Throughput calibration.
//!
//! The work unit's duration depends on the hardware, the current frequency and
//! the scheduling class, so every run measures how many units fit in one
//! second before any load is generated. The search has two phases: an
//! exponential probe that finds a count taking measurably long, then a damped
//! walk that nudges the count until one measurement takes about `target`.

use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::affinity;
use crate::error::{EngineError, Result};
use crate::work_unit::run_units;

pub const DEFAULT_TARGET: Duration = Duration::from_secs(2);

/// A probe must run at least this long before its timing is trusted.
pub const LOWER_BOUND: Duration = Duration::from_millis(100);

pub const MAX_ADJUSTMENTS: u32 = 64;

/// Doublings allowed in the probe phase before giving up.
pub const MAX_DOUBLINGS: u32 = 48;

const TOLERANCE: f64 = 0.10;

/// Result of a calibration. Shared read-only by every worker of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Calibration {
    /// Work units executed per second of wall time.
    pub loops_per_second: u64,
    /// Unit count of the final measurement.
    pub loops: u64,
    /// Wall time of the final measurement.
    pub wall: Duration,
    pub adjustments: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// Calibrates on the calling thread using the real work unit.
pub fn calibrate(target: Duration) -> Result<Calibration> {
    calibrate_with(target, |units| {
        let start = Instant::now();
        run_units(units);
        start.elapsed()
    })
}

/// Calibrates on a scoped thread pinned to `core`, optionally promoted to
/// real-time, so the rate reflects the conditions workers will run under.
pub fn calibrate_on(core: usize, realtime: bool, target: Duration) -> Result<Calibration> {
    thread::scope(|scope| {
        let calibrator = thread::Builder::new()
            .name(format!("calibrate-cpu{core}"))
            .spawn_scoped(scope, move || {
                affinity::pin_current_thread(core)
                    .map_err(|source| EngineError::Affinity { core, source })?;
                if realtime {
                    affinity::promote_current_thread()
                        .map_err(|source| EngineError::Scheduling { core, source })?;
                }
                calibrate(target)
            })
            .map_err(|source| EngineError::Spawn { core, source })?;

        calibrator
            .join()
            .map_err(|_| EngineError::WorkerPanicked { core })?
    })
}

/// The search itself, over an arbitrary `measure(units) -> wall time`.
pub fn calibrate_with<F>(target: Duration, mut measure: F) -> Result<Calibration>
where
    F: FnMut(u64) -> Duration,
{
    if target.is_zero() {
        return Err(EngineError::InvalidOption(
            "calibration target must be positive".into(),
        ));
    }
    let target_secs = target.as_secs_f64();
    info!("calibrating for {:.2} seconds", target_secs);

    let mut loops: u64 = 1;
    let mut doublings = 0;
    let mut wall = loop {
        let wall = measure(loops);
        debug!(loops, wall_secs = wall.as_secs_f64(), "probe");
        if wall > LOWER_BOUND {
            break wall;
        }
        if doublings == MAX_DOUBLINGS {
            return Err(EngineError::CalibrationFailed(format!(
                "{loops} loops still took only {wall:?}"
            )));
        }
        loops <<= 1;
        doublings += 1;
    };

    // Jump to the count the probe predicts for the target, then refine.
    loops = ((loops as f64 * target_secs / wall.as_secs_f64()).round() as u64).max(1);
    let mut pitch = (loops / 8).max(1);
    let mut last = None;
    let mut adjustments = 0;

    loop {
        wall = measure(loops);
        adjustments += 1;
        debug!(loops, pitch, wall_secs = wall.as_secs_f64(), "adjust");

        let error = (wall.as_secs_f64() - target_secs) / target_secs;
        if error.abs() <= TOLERANCE || adjustments >= MAX_ADJUSTMENTS {
            break;
        }

        let dir = if error > 0.0 { Direction::Down } else { Direction::Up };
        match last {
            Some(prev) if prev == dir => pitch = pitch.saturating_mul(2),
            Some(_) => pitch = (pitch / 2).max(1),
            None => {}
        }
        let next = match dir {
            Direction::Down => loops.saturating_sub(pitch).max(1),
            Direction::Up => loops.saturating_add(pitch),
        };
        if next.abs_diff(loops) <= 1 {
            break;
        }
        loops = next;
        last = Some(dir);
    }

    let rate = loops as f64 / wall.as_secs_f64();
    if !rate.is_finite() || rate < 1.0 {
        return Err(EngineError::CalibrationFailed(format!(
            "{loops} loops in {wall:?} is not a usable rate"
        )));
    }

    let calibration = Calibration {
        loops_per_second: rate.round() as u64,
        loops,
        wall,
        adjustments,
    };
    info!("loops per second = {}", calibration.loops_per_second);
    Ok(calibration)
}
