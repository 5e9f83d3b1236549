//! Reader-preferring gate around the "engine is stopping" state.
//!
//! Workers take read access every cycle; the driver takes write access
//! exactly once, to flip the run into shutdown. Readers never wait for each
//! other. A writer waits until no reader holds the gate and then keeps new
//! readers out until it lets go.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Barrier, Condvar, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct GateState {
    readers: usize,
    writer: bool,
}

#[derive(Debug, Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        // the state is two plain counters, a poisoned lock still holds valid data
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Shared access. Blocks only while a writer holds the gate.
    pub fn acquire_read(&self) -> ReadGuard<'_> {
        let mut state = self.lock();
        while state.writer {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        state.readers += 1;
        ReadGuard { gate: self }
    }

    /// Exclusive access. Waits for the current readers to drain.
    pub fn acquire_write(&self) -> WriteGuard<'_> {
        let mut state = self.lock();
        while state.writer || state.readers > 0 {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        state.writer = true;
        WriteGuard { gate: self }
    }

    pub fn readers(&self) -> usize {
        self.lock().readers
    }

    fn release_read(&self) {
        let mut state = self.lock();
        state.readers -= 1;
        if state.readers == 0 {
            self.changed.notify_all();
        }
    }

    fn release_write(&self) {
        let mut state = self.lock();
        state.writer = false;
        self.changed.notify_all();
    }
}

/// Shared access to a [`Gate`]; released on drop.
#[derive(Debug)]
#[must_use = "read access is released as soon as the guard is dropped"]
pub struct ReadGuard<'a> {
    gate: &'a Gate,
}

impl ReadGuard<'_> {
    pub fn release(self) {}
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.gate.release_read();
    }
}

/// Exclusive access to a [`Gate`]; released on drop.
#[derive(Debug)]
#[must_use = "write access is released as soon as the guard is dropped"]
pub struct WriteGuard<'a> {
    gate: &'a Gate,
}

impl WriteGuard<'_> {
    pub fn release(self) {}
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.gate.release_write();
    }
}

/// Run-wide shared state. Owned by the driver, borrowed by every worker.
#[derive(Debug, Default)]
pub struct EngineState {
    gate: Gate,
    // only touched while holding the gate
    stopping: AtomicBool,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The per-cycle check: take read access, meet the other workers at
    /// `barrier` if there is one, read the flag, release.
    pub fn observe(&self, barrier: Option<&Barrier>) -> bool {
        let guard = self.gate.acquire_read();
        if let Some(barrier) = barrier {
            barrier.wait();
        }
        let stopping = self.stopping.load(Ordering::Relaxed);
        guard.release();
        stopping
    }

    /// The single shutdown transition.
    pub fn begin_shutdown(&self) {
        let guard = self.gate.acquire_write();
        self.stopping.store(true, Ordering::Relaxed);
        guard.release();
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn readers_do_not_block_each_other() {
        let gate = Arc::new(Gate::new());
        let rendezvous = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let rendezvous = Arc::clone(&rendezvous);
                thread::spawn(move || {
                    let _read = gate.acquire_read();
                    // every reader must be inside at once to get past this
                    rendezvous.wait();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(gate.readers(), 0);
    }

    #[test]
    fn writer_waits_for_readers_to_drain() {
        let gate = Arc::new(Gate::new());
        let wrote = Arc::new(AtomicBool::new(false));

        let read = gate.acquire_read();
        let writer = {
            let gate = Arc::clone(&gate);
            let wrote = Arc::clone(&wrote);
            thread::spawn(move || {
                let _write = gate.acquire_write();
                wrote.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!wrote.load(Ordering::SeqCst));

        drop(read);
        writer.join().unwrap();
        assert!(wrote.load(Ordering::SeqCst));
    }

    #[test]
    fn writer_excludes_new_readers() {
        let gate = Arc::new(Gate::new());
        let entered = Arc::new(AtomicUsize::new(0));

        let write = gate.acquire_write();
        let readers: Vec<_> = (0..3)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let entered = Arc::clone(&entered);
                thread::spawn(move || {
                    let _read = gate.acquire_read();
                    entered.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(entered.load(Ordering::SeqCst), 0);

        write.release();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(entered.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn shutdown_is_observed() {
        let state = EngineState::new();
        assert!(!state.observe(None));
        state.begin_shutdown();
        assert!(state.observe(None));
        assert!(state.observe(None));
        assert_eq!(state.gate().readers(), 0);
    }

    #[test]
    fn observe_meets_peers_at_the_barrier() {
        let state = Arc::new(EngineState::new());
        let barrier = Arc::new(Barrier::new(3));

        let peers: Vec<_> = (0..3)
            .map(|_| {
                let state = Arc::clone(&state);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || state.observe(Some(&barrier)))
            })
            .collect();

        for peer in peers {
            assert!(!peer.join().unwrap());
        }
    }
}
