//! Interruptible polling thread.
//!
//! Each polling component (window guard, hosts watchdog, process monitor)
//! owns one of these. The loop checks the stop flag at the top of every
//! iteration and sleeps on a condvar, so `stop` wakes it immediately instead
//! of waiting out the interval.

use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn raise(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }

    fn is_raised(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleeps for `interval` or until raised. Returns true if raised.
    fn wait(&self, interval: Duration) -> bool {
        let deadline = Instant::now() + interval;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.wake.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

pub struct PollingWorker {
    name: String,
    signal: Arc<StopSignal>,
    done: mpsc::Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl PollingWorker {
    /// Runs `tick` immediately and then once per `interval` until stopped.
    /// A panicking tick is logged and the loop carries on.
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let signal = Arc::new(StopSignal::default());
        let (done_tx, done) = mpsc::channel();
        let thread_signal = signal.clone();
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                loop {
                    if thread_signal.is_raised() {
                        break;
                    }
                    if catch_unwind(AssertUnwindSafe(&mut tick)).is_err() {
                        error!(worker = %thread_name, "polling tick panicked");
                    }
                    if thread_signal.wait(interval) {
                        break;
                    }
                }
                debug!(worker = %thread_name, "polling worker exited");
                let _ = done_tx.send(());
            })?;
        Ok(Self {
            name: name.to_string(),
            signal,
            done,
            handle: Some(handle),
        })
    }

    /// Signals the loop and waits at most `timeout` for it to exit. Returns
    /// false if the thread had to be detached.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.signal.raise();
        let Some(handle) = self.handle.take() else {
            return true;
        };
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    worker = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "worker did not exit in time; detaching"
                );
                false
            }
        }
    }
}

impl Drop for PollingWorker {
    fn drop(&mut self) {
        self.signal.raise();
        if self.handle.take().is_some() {
            warn!(worker = %self.name, "worker dropped without stop; detaching signalled thread");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn stop_interrupts_long_interval() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let mut worker = PollingWorker::spawn("test-worker", Duration::from_secs(60), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        let begin = Instant::now();
        while ticks.load(Ordering::SeqCst) == 0 && begin.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(worker.stop(Duration::from_secs(2)));
        assert!(begin.elapsed() < Duration::from_secs(5));
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert!(worker.stop(Duration::from_millis(10)));
    }

    #[test]
    fn dropped_worker_still_exits() {
        let (exit_tx, exit_rx) = mpsc::channel();
        let worker = PollingWorker::spawn("dropped", Duration::from_secs(60), move || {
            let _ = exit_tx.send(());
        })
        .unwrap();
        exit_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        drop(worker);
        // The tick closure (and its sender) is released once the thread exits.
        assert!(matches!(
            exit_rx.recv_timeout(Duration::from_secs(2)),
            Err(RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn panicking_tick_keeps_looping() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let mut worker = PollingWorker::spawn("panicky", Duration::from_millis(5), move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first tick fails");
            }
        })
        .unwrap();
        let begin = Instant::now();
        while ticks.load(Ordering::SeqCst) < 3 && begin.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(worker.stop(Duration::from_secs(2)));
        assert!(ticks.load(Ordering::SeqCst) >= 3);
    }
}
