// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for blocking capture pumps
//!
//! Camera drivers hand out frames through blocking calls, so each open
//! device gets a dedicated thread that pumps frames into shared state.
//! [`CaptureThread`] owns that thread: it hands the body a [`StopSignal`],
//! and stopping (explicitly or on drop) sets the signal and joins.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Cooperative stop flag checked by the thread body between frames
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// Whether a stop has been requested
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Owner of a capture pump thread
pub struct CaptureThread {
    handle: Option<JoinHandle<()>>,
    stop: StopSignal,
    name: String,
}

impl CaptureThread {
    /// Spawn `body` on a named thread
    ///
    /// The body runs its own loop and must return once `stop.is_set()`.
    pub fn spawn<F>(name: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let stop = StopSignal::default();
        let thread_stop = stop.clone();
        let thread_name = name.to_string();

        info!(name = %name, "Starting capture thread");

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %thread_name, "Capture thread running");
                body(thread_stop);
                info!(name = %thread_name, "Capture thread exiting");
            })?;

        Ok(Self {
            handle: Some(handle),
            stop,
            name: name.to_string(),
        })
    }

    /// Whether the thread body is still running
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Request a stop without waiting
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting capture thread stop");
        self.stop.set();
    }

    /// Request a stop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(name = %self.name, "Capture thread panicked");
            } else {
                debug!(name = %self.name, "Capture thread joined");
            }
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            debug!(name = %self.name, "CaptureThread dropped, stopping");
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn test_stop_joins_body() {
        let counter = Arc::new(AtomicU32::new(0));
        let body_counter = Arc::clone(&counter);

        let mut thread = CaptureThread::spawn("test-pump", move |stop| {
            while !stop.is_set() {
                body_counter.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
            }
        })
        .unwrap();

        thread::sleep(Duration::from_millis(30));
        thread.stop();

        assert!(!thread.is_running());
        let seen = counter.load(Ordering::SeqCst);
        assert!(seen > 0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn test_body_may_finish_on_its_own() {
        let mut thread = CaptureThread::spawn("test-short", |_| {}).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(!thread.is_running());
        thread.stop();
    }

    #[test]
    fn test_drop_stops_thread() {
        let stopped = Arc::new(AtomicBool::new(false));
        let body_stopped = Arc::clone(&stopped);

        let thread = CaptureThread::spawn("test-drop", move |stop| {
            while !stop.is_set() {
                thread::sleep(Duration::from_millis(2));
            }
            body_stopped.store(true, Ordering::SeqCst);
        })
        .unwrap();

        drop(thread);
        assert!(stopped.load(Ordering::SeqCst));
    }
}
