//! Thread placement: CPU affinity and the real-time scheduling class.

use std::io;

/// Cores this process is allowed to run on.
#[cfg(target_os = "linux")]
pub fn allowed_cores() -> io::Result<Vec<usize>> {
    use std::mem::MaybeUninit;

    let set = unsafe {
        let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed();
        let result = libc::sched_getaffinity(
            0,
            std::mem::size_of::<libc::cpu_set_t>(),
            set.as_mut_ptr(),
        );
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        set.assume_init()
    };

    let cores = (0..libc::CPU_SETSIZE as usize)
        .filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, &set) })
        .collect();
    Ok(cores)
}

#[cfg(not(target_os = "linux"))]
pub fn allowed_cores() -> io::Result<Vec<usize>> {
    Ok((0..num_cpus::get()).collect())
}

/// Pins the calling thread to exactly one core.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(core: usize) -> io::Result<()> {
    use std::mem::MaybeUninit;

    if core >= libc::CPU_SETSIZE as usize {
        return Err(io::Error::from_raw_os_error(libc::EINVAL));
    }

    unsafe {
        let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed();
        let set_ref = set.assume_init_mut();

        libc::CPU_ZERO(set_ref);
        libc::CPU_SET(core, set_ref);

        let result = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), set_ref);
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_core: usize) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "CPU pinning is not supported on this platform",
    ))
}

/// Moves the calling thread into `SCHED_FIFO` at the highest priority the
/// class offers. Usually needs `CAP_SYS_NICE`.
#[cfg(unix)]
pub fn promote_current_thread() -> io::Result<()> {
    let priority = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
    if priority == -1 {
        return Err(io::Error::last_os_error());
    }

    let param = libc::sched_param {
        sched_priority: priority,
    };
    // pthread_* report failure through the return value, not errno
    let result =
        unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(result))
    }
}

#[cfg(not(unix))]
pub fn promote_current_thread() -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "real-time scheduling is not supported on this platform",
    ))
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::thread;

    fn current_policy() -> libc::c_int {
        let mut policy = 0;
        let mut param = libc::sched_param { sched_priority: 0 };
        let result =
            unsafe { libc::pthread_getschedparam(libc::pthread_self(), &mut policy, &mut param) };
        assert_eq!(result, 0);
        policy
    }

    #[test]
    fn process_has_at_least_one_core() {
        let cores = allowed_cores().unwrap();
        assert!(!cores.is_empty());
    }

    #[test]
    fn pinning_restricts_the_thread() {
        let core = allowed_cores().unwrap()[0];
        thread::spawn(move || {
            pin_current_thread(core).unwrap();
            assert_eq!(allowed_cores().unwrap(), vec![core]);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn pinning_to_missing_core_fails() {
        thread::spawn(|| {
            assert!(pin_current_thread(libc::CPU_SETSIZE as usize + 1).is_err());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn promotion_either_succeeds_or_reports_permission() {
        thread::spawn(|| match promote_current_thread() {
            Ok(()) => assert_eq!(current_policy(), libc::SCHED_FIFO),
            Err(err) => assert_eq!(err.raw_os_error(), Some(libc::EPERM)),
        })
        .join()
        .unwrap();
    }
}
