// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    super::*,
    std::{
        sync::mpsc,
        thread,
        time::{Duration, Instant},
    },
    tracing::debug,
};

/// Fan-out of independent background jobs with timed result gathering.
///
/// Each job runs on its own thread and reports exactly once over a shared completion channel.
/// Gathering waits for one report per job until a deadline; jobs which have not reported by
/// then are abandoned rather than killed, so their threads may outlive the dispatcher and a
/// missing result can mean "still running". A panicked job never reports and times out the
/// same way.
pub struct Dispatcher<T> {
    tx: mpsc::Sender<(String, T)>,
    rx: mpsc::Receiver<(String, T)>,
    job_count: usize,
}

impl<T: Send + 'static> Dispatcher<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Dispatcher {
            tx,
            rx,
            job_count: 0,
        }
    }

    /// Launch a labelled background job.
    pub fn spawn<F>(&mut self, label: String, job: F)
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = job();
            // The gathering side may have given up already.
            let _ = tx.send((label, result));
        });
        self.job_count += 1;
    }

    /// Wait for the outstanding jobs until the timeout elapses, measured from the call. The
    /// completed results are returned in the order the jobs reported.
    pub fn gather(self, timeout: Duration) -> Vec<(String, T)> {
        let deadline = Instant::now() + timeout;
        let mut results = Vec::with_capacity(self.job_count);
        for _ in 0..self.job_count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(entry) => results.push(entry),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    debug!(
                        "gave up waiting for {} outstanding jobs",
                        self.job_count - results.len()
                    );
                    break;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        results
    }
}

impl<T: Send + 'static> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn gather_is_independent_of_completion_order() {
        let mut dispatcher = Dispatcher::new();
        for i in 0..8u64 {
            dispatcher.spawn(format!("job-{}", i), move || {
                thread::sleep(Duration::from_millis(8 - i));
                i
            });
        }
        let mut results = dispatcher.gather(Duration::from_secs(5));
        assert_eq!(results.len(), 8);
        results.sort();
        for (i, (label, value)) in results.iter().enumerate() {
            assert_eq!(label, &format!("job-{}", i));
            assert_eq!(*value, i as u64);
        }
    }

    #[test]
    fn gather_abandons_overdue_jobs() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.spawn("quick".to_string(), || true);
        dispatcher.spawn("slow".to_string(), || {
            thread::sleep(Duration::from_secs(10));
            true
        });
        let results = dispatcher.gather(Duration::from_millis(200));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "quick");
    }

    #[test]
    fn gather_skips_panicked_jobs() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.spawn("sound".to_string(), || ());
        dispatcher.spawn("broken".to_string(), || panic!("no report"));
        let results = dispatcher.gather(Duration::from_millis(200));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "sound");
    }
}
