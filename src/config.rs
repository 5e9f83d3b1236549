//! Run-wide options.
//!
//! Defaults can be overridden from the environment (`CPUHOGS_SYNC`,
//! `CPUHOGS_CALIBRATION_SECONDS`); command-line flags override both.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calibrate;
use crate::error::{EngineError, Result};

pub const SYNC_VAR: &str = "CPUHOGS_SYNC";
pub const CALIBRATION_VAR: &str = "CPUHOGS_CALIBRATION_SECONDS";

pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Meet at a barrier every cycle so all cores burst together.
    pub sync: bool,
    /// How long one calibration measurement should take.
    pub calibration_target: Duration,
    /// Run workers under `SCHED_FIFO`.
    pub realtime: bool,
    /// Install the SIGINT/SIGTERM handler for this run.
    pub handle_signals: bool,
    pub poll_period: Duration,
    /// Stop on its own after this long. `None` runs until terminated.
    pub duration: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            sync: true,
            calibration_target: calibrate::DEFAULT_TARGET,
            realtime: true,
            handle_signals: true,
            poll_period: DEFAULT_POLL_PERIOD,
            duration: None,
        }
    }
}

impl RunOptions {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();

        if let Some(raw) = lookup(SYNC_VAR) {
            options.sync = parse_bool(&raw).ok_or_else(|| {
                EngineError::InvalidOption(format!("{SYNC_VAR}={raw} is not a boolean"))
            })?;
        }
        if let Some(raw) = lookup(CALIBRATION_VAR) {
            let secs: f64 = raw.trim().parse().map_err(|_| {
                EngineError::InvalidOption(format!("{CALIBRATION_VAR}={raw} is not a number"))
            })?;
            options.calibration_target = seconds(secs, CALIBRATION_VAR)?;
        }

        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.calibration_target.is_zero() {
            return Err(EngineError::InvalidOption(
                "calibration target must be positive".into(),
            ));
        }
        if self.poll_period.is_zero() {
            return Err(EngineError::InvalidOption("poll period must be positive".into()));
        }
        if self.duration.is_some_and(|d| d.is_zero()) {
            return Err(EngineError::InvalidOption("duration must be positive".into()));
        }
        Ok(())
    }
}

/// Converts user-supplied seconds, rejecting negative, zero and non-finite values.
pub fn seconds(secs: f64, what: &str) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(EngineError::InvalidOption(format!(
            "{what} must be a positive number of seconds, got {secs}"
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|err| EngineError::InvalidOption(format!("{what}: {err}")))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let options = RunOptions::from_lookup(lookup(&[])).unwrap();
        assert_eq!(options, RunOptions::default());
        assert!(options.sync);
        assert_eq!(options.calibration_target, Duration::from_secs(2));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn environment_overrides_defaults() {
        let options =
            RunOptions::from_lookup(lookup(&[(SYNC_VAR, "0"), (CALIBRATION_VAR, "0.5")])).unwrap();
        assert!(!options.sync);
        assert_eq!(options.calibration_target, Duration::from_millis(500));
    }

    #[test]
    fn malformed_environment_is_rejected() {
        assert!(RunOptions::from_lookup(lookup(&[(SYNC_VAR, "maybe")])).is_err());
        assert!(RunOptions::from_lookup(lookup(&[(CALIBRATION_VAR, "-1")])).is_err());
        assert!(RunOptions::from_lookup(lookup(&[(CALIBRATION_VAR, "fast")])).is_err());
    }

    #[test]
    fn zero_durations_fail_validation() {
        let options = RunOptions {
            duration: Some(Duration::ZERO),
            ..RunOptions::default()
        };
        assert!(options.validate().is_err());

        let options = RunOptions {
            poll_period: Duration::ZERO,
            ..RunOptions::default()
        };
        assert!(options.validate().is_err());
    }
}
