//! Cooperative cancellation for the polling loops.
//!
//! Loops only look at the signal while sleeping between samples, so a stop
//! request never interrupts a read or a git subprocess halfway.

use std::cell::Cell;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

/// Requests a stop; cheap to clone into signal handlers.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Sender<()>,
}

impl StopHandle {
    pub fn stop(&self) {
        // A closed channel means the loop is already gone.
        let _ = self.tx.send(());
    }
}

/// Observed by a loop at its sleep boundary.
#[derive(Debug)]
pub struct StopSignal {
    rx: Receiver<()>,
    stopped: Cell<bool>,
}

impl StopSignal {
    /// Non-blocking check.
    pub fn is_stopped(&self) -> bool {
        if !self.stopped.get() && self.rx.try_recv().is_ok() {
            self.stopped.set(true);
        }
        self.stopped.get()
    }

    /// Sleep up to `timeout`; returns `true` as soon as a stop is requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.stopped.get() {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(()) => {
                self.stopped.set(true);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                // Every handle is gone, so no stop can arrive any more.
                thread::sleep(timeout);
                false
            }
        }
    }
}

pub fn stop_pair() -> (StopHandle, StopSignal) {
    let (tx, rx) = mpsc::channel();
    (
        StopHandle { tx },
        StopSignal {
            rx,
            stopped: Cell::new(false),
        },
    )
}

/// Route Ctrl-C to a fresh [`StopSignal`].
pub fn install_ctrlc() -> Result<StopSignal> {
    let (handle, signal) = stop_pair();
    ctrlc::set_handler(move || {
        debug!("interrupt received");
        handle.stop();
    })
    .context("install Ctrl-C handler")?;
    Ok(signal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_latched() {
        let (handle, signal) = stop_pair();
        assert!(!signal.is_stopped());
        handle.stop();
        assert!(signal.wait(Duration::from_secs(5)));
        assert!(signal.is_stopped());
        assert!(signal.wait(Duration::from_secs(5)));
    }

    #[test]
    fn wait_times_out_without_a_stop() {
        let (_handle, signal) = stop_pair();
        assert!(!signal.wait(Duration::from_millis(10)));
    }

    #[test]
    fn stop_from_another_thread_wakes_the_sleeper() {
        let (handle, signal) = stop_pair();
        let stopper = thread::spawn(move || handle.stop());
        assert!(signal.wait(Duration::from_secs(30)));
        stopper.join().expect("join");
    }
}
