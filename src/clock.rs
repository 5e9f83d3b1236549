//! Drift-free sleeping against the monotonic clock.

use std::io;
use std::time::Duration;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// An absolute point on `CLOCK_MONOTONIC`.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    #[cfg(target_os = "linux")]
    at: libc::timespec,
    #[cfg(not(target_os = "linux"))]
    at: std::time::Instant,
}

impl Deadline {
    /// `interval` from now.
    #[cfg(target_os = "linux")]
    pub fn after(interval: Duration) -> io::Result<Self> {
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let nanos = now.tv_nsec as i64 + interval.subsec_nanos() as i64;
        let secs = interval.as_secs() as i64 + nanos / NANOS_PER_SEC;
        let at = libc::timespec {
            tv_sec: now.tv_sec + secs as libc::time_t,
            tv_nsec: (nanos % NANOS_PER_SEC) as _,
        };
        Ok(Self { at })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn after(interval: Duration) -> io::Result<Self> {
        Ok(Self {
            at: std::time::Instant::now() + interval,
        })
    }

    /// Blocks until the deadline. A wake-up by a signal resumes waiting for
    /// the same deadline instead of restarting the interval.
    #[cfg(target_os = "linux")]
    pub fn sleep(&self) -> io::Result<()> {
        loop {
            let ret = unsafe {
                libc::clock_nanosleep(
                    libc::CLOCK_MONOTONIC,
                    libc::TIMER_ABSTIME,
                    &self.at,
                    std::ptr::null_mut(),
                )
            };
            match ret {
                0 => return Ok(()),
                libc::EINTR => continue,
                errno => return Err(io::Error::from_raw_os_error(errno)),
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn sleep(&self) -> io::Result<()> {
        let remaining = self.at.saturating_duration_since(std::time::Instant::now());
        std::thread::sleep(remaining);
        Ok(())
    }
}

/// Sleeps until `interval` from now.
pub fn sleep_for(interval: Duration) -> io::Result<()> {
    Deadline::after(interval)?.sleep()
}
