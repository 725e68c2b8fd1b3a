//! Cooperative cancellation bus
//!
//! A cloneable handle around a termination flag and the set of live child
//! processes. Every component checks the flag at its suspension points;
//! `request_cancel` trips the flag and sends SIGTERM to every registered
//! child without waiting for any of them.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, info};

use pdibuild_core::{Error, Result};

#[derive(Debug, Default)]
struct Inner {
    terminate_requested: AtomicBool,
    live_processes: Mutex<HashSet<u32>>,
}

/// Cloneable cancellation handle shared by the whole build fleet.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// Create a fresh, untripped token
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with [`Error::Cancelled`] once termination has been requested.
    ///
    /// This is the only way the core discovers cancellation; call it before
    /// and after every blocking operation.
    pub fn check(&self) -> Result<()> {
        if self.inner.terminate_requested.load(Ordering::Acquire) {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Non-failing form of [`check`](Self::check)
    pub fn is_cancelled(&self) -> bool {
        self.inner.terminate_requested.load(Ordering::Acquire)
    }

    /// Trip the flag and SIGTERM every live child. Idempotent; never waits.
    pub fn request_cancel(&self) {
        if !self.inner.terminate_requested.swap(true, Ordering::AcqRel) {
            info!("cancellation requested, terminating in-flight processes");
        }

        let pids: Vec<u32> = {
            let live = self.inner.live_processes.lock().unwrap();
            live.iter().copied().collect()
        };
        for pid in pids {
            debug!(pid, "sending SIGTERM");
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }

    /// Register a spawned child; the returned guard unregisters it on drop.
    pub fn register(&self, pid: u32) -> ChildGuard {
        self.inner.live_processes.lock().unwrap().insert(pid);
        ChildGuard { token: self.clone(), pid }
    }

    #[cfg(test)]
    fn live_count(&self) -> usize {
        self.inner.live_processes.lock().unwrap().len()
    }
}

/// Keeps one child in the live set for as long as it runs.
#[derive(Debug)]
pub struct ChildGuard {
    token: CancelToken,
    pid: u32,
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.token
            .inner
            .live_processes
            .lock()
            .unwrap()
            .remove(&self.pid);
    }
}
