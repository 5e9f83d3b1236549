//! Per-core targets as given on the command line.
//!
//! A target is either a busy ratio (`CORE:RATIO`) or a frequency the core
//! should appear to run at (`CORE@KHZ`). The latter becomes the ratio of
//! capacity that has to be burned away: `1 - KHZ / max_khz`.
//!
//! `:` always introduces a ratio and `@` a frequency. There is no
//! `CORE:FREQ` form and no `f` suffix marking a ratio.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sysinfo::System;

use crate::error::PlanError;
use crate::plan::{CoreLoadSpec, LoadPlan};

const CPUFREQ_ROOT: &str = "/sys/devices/system/cpu";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoreTarget {
    Ratio { core: usize, ratio: f64 },
    Frequency { core: usize, khz: u64 },
}

impl FromStr for CoreTarget {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || PlanError::BadTarget(s.to_string());

        if let Some((core, ratio)) = s.split_once(':') {
            let core = core.trim().parse().map_err(|_| bad())?;
            let ratio = ratio.trim().parse().map_err(|_| bad())?;
            return Ok(CoreTarget::Ratio { core, ratio });
        }
        if let Some((core, khz)) = s.split_once('@') {
            let core = core.trim().parse().map_err(|_| bad())?;
            let khz = khz.trim().trim_end_matches("kHz").parse().map_err(|_| bad())?;
            return Ok(CoreTarget::Frequency { core, khz });
        }
        Err(bad())
    }
}

/// Highest frequency of `core` in kHz. With `use_cpufreq` the cpufreq sysfs
/// entry is preferred when the kernel exposes one; otherwise the frequency
/// reported by `sysinfo` is used.
pub fn max_frequency_khz(core: usize, use_cpufreq: bool) -> Option<u64> {
    let cpufreq = Path::new(CPUFREQ_ROOT).join("cpu0").join("cpufreq");
    if use_cpufreq && cpufreq.exists() {
        return read_cpufreq_max(core);
    }
    reported_frequency_khz(core)
}

fn read_cpufreq_max(core: usize) -> Option<u64> {
    let path = Path::new(CPUFREQ_ROOT)
        .join(format!("cpu{core}"))
        .join("cpufreq")
        .join("cpuinfo_max_freq");
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn reported_frequency_khz(core: usize) -> Option<u64> {
    let mut sys = System::new();
    sys.refresh_cpu_frequency();
    sys.cpus()
        .get(core)
        .map(|cpu| cpu.frequency() * 1000)
        .filter(|&khz| khz > 0)
}

/// Turns targets into a validated plan, looking frequencies up on this machine.
pub fn resolve(
    targets: &[CoreTarget],
    interval: Duration,
    use_cpufreq: bool,
) -> Result<LoadPlan, PlanError> {
    resolve_with(targets, interval, use_cpufreq, max_frequency_khz)
}

/// [`resolve`] with an explicit maximum-frequency source.
pub fn resolve_with<F>(
    targets: &[CoreTarget],
    interval: Duration,
    use_cpufreq: bool,
    max_khz: F,
) -> Result<LoadPlan, PlanError>
where
    F: Fn(usize, bool) -> Option<u64>,
{
    let specs = targets
        .iter()
        .map(|target| match *target {
            CoreTarget::Ratio { core, ratio } => Ok(CoreLoadSpec::new(core, ratio)),
            CoreTarget::Frequency { core, khz } => {
                let max = max_khz(core, use_cpufreq).ok_or(PlanError::UnknownFrequency(core))?;
                Ok(CoreLoadSpec::new(core, 1.0 - khz as f64 / max as f64))
            }
        })
        .collect::<Result<Vec<_>, PlanError>>()?;

    LoadPlan::new(interval, use_cpufreq, specs)
}
