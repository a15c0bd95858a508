//! One-shot job scheduling at a wall-clock time.
//!
//! `schedule_at` returns an owned handle instead of registering the job in
//! process-wide state. The handle cancels the job when shut down or dropped.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime, TimeZone};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Longest single sleep, so wall-clock jumps (suspend, NTP) are noticed.
const MAX_SLEEP: Duration = Duration::from_secs(1);

/// Today at `at` if that is strictly after `now`, otherwise tomorrow at `at`.
pub fn next_occurrence(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// [`next_occurrence`] in the local time zone.
pub fn next_local_occurrence(now: DateTime<Local>, at: NaiveTime) -> DateTime<Local> {
    let naive = next_occurrence(now.naive_local(), at);
    // A time skipped by a DST change resolves to the same offset from now.
    Local
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| now + (naive - now.naive_local()))
}

/// Handle to a job waiting to run on its own thread.
pub struct ScheduledJob<T> {
    run_at: DateTime<Local>,
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<Option<T>>>,
}

/// Runs `job` once at `run_at`, or immediately if that time has passed.
pub fn schedule_at<T, F>(run_at: DateTime<Local>, job: F) -> ScheduledJob<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (cancel_tx, cancel_rx) = channel::<()>();

    let handle = thread::spawn(move || {
        loop {
            let remaining = (run_at - Local::now()).to_std().unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                break;
            }
            match cancel_rx.recv_timeout(remaining.min(MAX_SLEEP)) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    log::info!("Scheduled job for {} cancelled", run_at.format("%Y-%m-%d %H:%M:%S"));
                    return None;
                }
            }
        }
        log::info!("Scheduled job firing at {}", Local::now().format("%H:%M:%S%.3f"));
        Some(job())
    });

    log::info!("Job scheduled for {}", run_at.format("%Y-%m-%d %H:%M:%S"));

    ScheduledJob {
        run_at,
        cancel: Some(cancel_tx),
        handle: Some(handle),
    }
}

impl<T> ScheduledJob<T> {
    pub fn run_at(&self) -> DateTime<Local> {
        self.run_at
    }

    /// Blocks until the job has run and returns its result.
    ///
    /// `None` means the job was cancelled before it fired, or its result was
    /// already taken by an earlier `wait`.
    pub fn wait(&mut self) -> Result<Option<T>> {
        self.join()
    }

    /// Cancels the job if it has not fired yet and waits for its thread.
    pub fn shutdown(mut self) -> Result<Option<T>> {
        self.cancel.take();
        self.join()
    }

    fn join(&mut self) -> Result<Option<T>> {
        let Some(handle) = self.handle.take() else {
            return Ok(None);
        };
        handle.join().map_err(|_| anyhow!("Scheduled job panicked"))
    }
}

impl<T> Drop for ScheduledJob<T> {
    fn drop(&mut self) {
        // Dropping the sender disconnects the channel, which cancels a pending job.
        self.cancel.take();
        let _ = self.join();
    }
}
