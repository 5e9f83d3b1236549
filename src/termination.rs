use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::{EngineError, Result};

/// The one flag external termination requests write to. Setting it is a
/// single atomic store; turning it into a shutdown is the driver's job.
#[derive(Debug, Clone, Default)]
pub struct TerminationFlag(Arc<AtomicBool>);

impl TerminationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Routes SIGINT, SIGTERM and SIGHUP to `flag`. Only one handler may be
/// installed per process.
pub fn install_handler(flag: TerminationFlag) -> Result<()> {
    ctrlc::set_handler(move || flag.request())
        .map_err(|err| EngineError::SignalHandler(err.to_string()))?;
    debug!("termination handler installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let flag = TerminationFlag::new();
        let remote = flag.clone();
        assert!(!flag.is_requested());
        remote.request();
        assert!(flag.is_requested());
    }
}
