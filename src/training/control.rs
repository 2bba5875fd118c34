//! Per-session control channel between the manager and its engine.
//!
//! Three one-way signals (pause, resume, stop) behind a mutex plus a condvar
//! the engine parks on while paused. The engine consults the handle only at
//! epoch boundaries, so signals are honored at the end of the epoch in
//! flight.
//!
//! Lock ordering: the engine acquires the flags lock first and may touch the
//! session record inside the checkpoint callbacks. Callers on the HTTP side
//! must therefore never invoke a handle method while holding a session lock.

use std::sync::{Condvar, Mutex, PoisonError};

use crate::training::session::lock;

#[derive(Default)]
struct Flags {
    pause_requested: bool,
    stop_requested: bool,
}

pub struct ControlHandle {
    flags: Mutex<Flags>,
    wake: Condvar,
}

/// What the engine should do after a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Continue,
    Stop,
}

impl ControlHandle {
    pub fn new() -> Self {
        Self {
            flags: Mutex::new(Flags::default()),
            wake: Condvar::new(),
        }
    }

    pub fn request_pause(&self) {
        lock(&self.flags).pause_requested = true;
    }

    /// Clears any pending pause, whether or not the engine has parked yet,
    /// and wakes it if it has.
    pub fn request_resume(&self) {
        lock(&self.flags).pause_requested = false;
        self.wake.notify_all();
    }

    pub fn request_stop(&self) {
        let mut flags = lock(&self.flags);
        flags.stop_requested = true;
        drop(flags);
        self.wake.notify_all();
    }

    pub fn stop_requested(&self) -> bool {
        lock(&self.flags).stop_requested
    }

    /// Epoch-boundary consultation. If a pause is pending, `on_pause` runs
    /// once and the calling thread blocks until resume or stop; `on_resume`
    /// runs when the engine wakes back into the running state.
    pub fn checkpoint(&self, on_pause: impl FnOnce(), on_resume: impl FnOnce()) -> Directive {
        let mut flags = lock(&self.flags);
        if flags.stop_requested {
            return Directive::Stop;
        }
        if flags.pause_requested {
            on_pause();
            while flags.pause_requested && !flags.stop_requested {
                flags = self
                    .wake
                    .wait(flags)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if flags.stop_requested {
                return Directive::Stop;
            }
            on_resume();
        }
        Directive::Continue
    }
}

impl Default for ControlHandle {
    fn default() -> Self {
        Self::new()
    }
}
