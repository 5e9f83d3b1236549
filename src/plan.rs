//! Load plans: which cores to load, how hard, and how often each worker
//! wakes up. A [`LoadPlan`] can only be obtained through validation, so
//! everything downstream may assume its invariants hold.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PlanError;

/// Wake-up interval used when none is given (10ms).
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(10);

/// Fraction of wall time `core` should spend busy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoreLoadSpec {
    pub core: usize,
    pub ratio: f64,
}

impl CoreLoadSpec {
    pub fn new(core: usize, ratio: f64) -> Self {
        Self { core, ratio }
    }
}

/// A validated, immutable description of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLoadPlan", into = "RawLoadPlan")]
pub struct LoadPlan {
    interval: Duration,
    use_frequency_scaling_hint: bool,
    specs: Vec<CoreLoadSpec>,
}

impl LoadPlan {
    /// Builds a plan, rejecting duplicate cores, ratios outside `[0, 1]`
    /// and plans whose ratios differ between cores.
    pub fn new(
        interval: Duration,
        use_frequency_scaling_hint: bool,
        specs: Vec<CoreLoadSpec>,
    ) -> Result<Self, PlanError> {
        validate(interval, &specs)?;
        Ok(Self {
            interval,
            use_frequency_scaling_hint,
            specs,
        })
    }

    /// Same ratio on every listed core, default interval.
    pub fn uniform(cores: &[usize], ratio: f64) -> Result<Self, PlanError> {
        let specs = cores.iter().map(|&core| CoreLoadSpec::new(core, ratio)).collect();
        Self::new(DEFAULT_INTERVAL, true, specs)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn use_frequency_scaling_hint(&self) -> bool {
        self.use_frequency_scaling_hint
    }

    pub fn specs(&self) -> &[CoreLoadSpec] {
        &self.specs
    }

    /// The single ratio shared by every core in the plan.
    pub fn ratio(&self) -> f64 {
        // validation guarantees at least one spec
        self.specs[0].ratio
    }

    pub fn cores(&self) -> impl Iterator<Item = usize> + '_ {
        self.specs.iter().map(|spec| spec.core)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Checks every plan invariant, reporting the first violation found.
pub fn validate(interval: Duration, specs: &[CoreLoadSpec]) -> Result<(), PlanError> {
    if specs.is_empty() {
        return Err(PlanError::Empty);
    }
    if interval.is_zero() {
        return Err(PlanError::InvalidInterval(interval));
    }

    let mut seen = HashSet::with_capacity(specs.len());
    for spec in specs {
        if !seen.insert(spec.core) {
            return Err(PlanError::DuplicateCore(spec.core));
        }
        if !(0.0..=1.0).contains(&spec.ratio) {
            return Err(PlanError::RatioOutOfRange {
                core: spec.core,
                ratio: spec.ratio,
            });
        }
    }

    let expected = specs[0].ratio;
    if let Some(spec) = specs.iter().find(|spec| spec.ratio != expected) {
        return Err(PlanError::NonUniformRatio {
            core: spec.core,
            ratio: spec.ratio,
            expected,
        });
    }

    Ok(())
}

/// Unchecked wire form of a [`LoadPlan`], as found in plan files.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawLoadPlan {
    #[serde(default = "default_interval_secs")]
    interval_secs: f64,
    #[serde(default = "default_true")]
    use_frequency_scaling_hint: bool,
    specs: Vec<CoreLoadSpec>,
}

fn default_interval_secs() -> f64 {
    DEFAULT_INTERVAL.as_secs_f64()
}

fn default_true() -> bool {
    true
}

impl TryFrom<RawLoadPlan> for LoadPlan {
    type Error = PlanError;

    fn try_from(raw: RawLoadPlan) -> Result<Self, Self::Error> {
        let interval = Duration::try_from_secs_f64(raw.interval_secs)
            .map_err(|_| PlanError::InvalidInterval(Duration::ZERO))?;
        LoadPlan::new(interval, raw.use_frequency_scaling_hint, raw.specs)
    }
}

impl From<LoadPlan> for RawLoadPlan {
    fn from(plan: LoadPlan) -> Self {
        Self {
            interval_secs: plan.interval.as_secs_f64(),
            use_frequency_scaling_hint: plan.use_frequency_scaling_hint,
            specs: plan.specs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(pairs: &[(usize, f64)]) -> Vec<CoreLoadSpec> {
        pairs.iter().map(|&(c, r)| CoreLoadSpec::new(c, r)).collect()
    }

    #[test]
    fn accepts_uniform_plan() {
        let plan = LoadPlan::new(DEFAULT_INTERVAL, true, specs(&[(0, 0.5), (2, 0.5)])).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.ratio(), 0.5);
        assert_eq!(plan.cores().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn rejects_duplicate_core() {
        let err = LoadPlan::new(DEFAULT_INTERVAL, true, specs(&[(1, 0.5), (1, 0.5)])).unwrap_err();
        assert_eq!(err, PlanError::DuplicateCore(1));
    }

    #[test]
    fn rejects_out_of_range_ratios() {
        for bad in [1.5, -0.1, f64::NAN] {
            let err = LoadPlan::uniform(&[0], bad).unwrap_err();
            assert!(matches!(err, PlanError::RatioOutOfRange { core: 0, .. }), "{bad}: {err}");
        }
    }

    #[test]
    fn rejects_non_uniform_ratios() {
        let err = LoadPlan::new(DEFAULT_INTERVAL, true, specs(&[(0, 0.3), (1, 0.5)])).unwrap_err();
        assert_eq!(
            err,
            PlanError::NonUniformRatio {
                core: 1,
                ratio: 0.5,
                expected: 0.3
            }
        );
    }

    #[test]
    fn rejects_empty_plan_and_zero_interval() {
        assert_eq!(LoadPlan::uniform(&[], 0.5).unwrap_err(), PlanError::Empty);
        let err = LoadPlan::new(Duration::ZERO, true, specs(&[(0, 0.5)])).unwrap_err();
        assert_eq!(err, PlanError::InvalidInterval(Duration::ZERO));
    }

    #[test]
    fn boundary_ratios_are_valid() {
        assert!(LoadPlan::uniform(&[0], 0.0).is_ok());
        assert!(LoadPlan::uniform(&[0], 1.0).is_ok());
    }

    #[test]
    fn plan_file_goes_through_validation() {
        let plan: LoadPlan = serde_json::from_str(
            r#"{"interval_secs": 0.05, "specs": [{"core": 0, "ratio": 0.25}]}"#,
        )
        .unwrap();
        assert_eq!(plan.interval(), Duration::from_millis(50));
        assert!(plan.use_frequency_scaling_hint());

        let bad = serde_json::from_str::<LoadPlan>(
            r#"{"specs": [{"core": 0, "ratio": 0.3}, {"core": 1, "ratio": 0.5}]}"#,
        );
        assert!(bad.is_err());
    }
}
