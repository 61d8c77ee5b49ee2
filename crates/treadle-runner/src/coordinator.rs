//! Shared stop signal for cooperating worker threads.

use crate::error::{RunnerError, RunnerResult};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::debug;

/// Coordinates shutdown of background worker threads.
///
/// Clones share the same signal state. A stop is requested at most once
/// per run; the first error recorded alongside a stop wins and is
/// surfaced to whoever calls [`Coordinator::join`].
#[derive(Clone, Default)]
pub struct Coordinator {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    stopped: Condvar,
}

#[derive(Default)]
struct State {
    stop_requested: bool,
    error: Option<anyhow::Error>,
}

impl Coordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that all cooperating threads stop, optionally recording
    /// the error that caused it. Errors after the first are dropped.
    ///
    /// Wakes every thread blocked in [`Coordinator::wait_for_stop`].
    pub fn request_stop(&self, error: Option<anyhow::Error>) {
        let mut state = self.shared.state.lock();
        if let Some(err) = error {
            if state.error.is_none() {
                state.error = Some(err);
            } else {
                debug!(error = %err, "dropping secondary worker error");
            }
        }
        state.stop_requested = true;
        drop(state);
        self.shared.stopped.notify_all();
    }

    /// True once a stop has been requested.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.shared.state.lock().stop_requested
    }

    /// Blocks until a stop is requested.
    pub fn wait_for_stop(&self) {
        let mut state = self.shared.state.lock();
        while !state.stop_requested {
            self.shared.stopped.wait(&mut state);
        }
    }

    /// Blocks until a stop is requested or `timeout` elapses.
    ///
    /// Returns whether the stop was seen.
    pub fn wait_for_stop_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.stop_requested {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if self.shared.stopped.wait_for(&mut state, deadline - now).timed_out() {
                break;
            }
        }
        state.stop_requested
    }

    /// Takes the recorded error, leaving the stop flag in place.
    pub fn take_error(&self) -> Option<anyhow::Error> {
        self.shared.state.lock().error.take()
    }

    /// Joins worker threads after a stop has been requested.
    ///
    /// Panicked workers are converted into recorded errors. Returns the
    /// first error recorded by any worker.
    pub fn join(&self, handles: Vec<JoinHandle<()>>) -> RunnerResult<()> {
        for handle in handles {
            if let Err(panic) = handle.join() {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                self.request_stop(Some(anyhow::anyhow!("worker thread panicked: {message}")));
            }
        }
        match self.take_error() {
            Some(err) => Err(RunnerError::Worker(err)),
            None => Ok(()),
        }
    }
}
