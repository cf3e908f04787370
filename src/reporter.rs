//! Activity and job reporting from running modules to the host.
//!
//! The capability gate installs activity/job entries that call through this
//! trait; the test runner also prints through it. Implementations decide
//! where the output lands (console, ND-JSON stream, a test buffer).

use std::io::{stderr, stdout, Write};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Report events, activities and messages from the running module.
pub trait Reporter: Send + Sync {
    /// Print a debug log message (console output from the module or the
    /// test runner). The message includes its final newline; implementations
    /// must not append one.
    fn debug_print(&self, msg: &str);

    /// Record an activity entry with level "info". No trailing newline.
    fn info_activity(&self, msg: &str);

    /// Record an activity entry with level "error". No trailing newline.
    fn error_activity(&self, msg: &str);

    /// The module completed another job.
    fn job_completed(&self);
}

/// Throttles job-completion reports so a busy module does not flood the log.
///
/// The first completion is always reported; later ones only after `delay`
/// has elapsed since the last report. `flush` reports any completions that
/// arrived after the last report.
#[derive(Debug)]
pub struct JobCompletionTracker {
    delay: Duration,
    counter: u64,
    last_report: Option<(Instant, u64)>,
}

impl JobCompletionTracker {
    pub fn new(initial_count: u64, delay: Duration) -> Self {
        Self {
            delay,
            counter: initial_count,
            last_report: None,
        }
    }

    pub fn total(&self) -> u64 {
        self.counter
    }

    pub fn job_completed<F: FnOnce(u64)>(&mut self, log: F) {
        self.counter += 1;

        if let Some((at, _)) = self.last_report {
            if at.elapsed() < self.delay {
                return;
            }
        }
        self.last_report.replace((Instant::now(), self.counter));
        log(self.counter);
    }

    pub fn flush<F: FnOnce(u64)>(&mut self, log: F) {
        if let Some((_, last_total)) = self.last_report {
            if last_total != self.counter {
                log(self.counter);
            }
        }
    }
}

/// Logs activities to stdout and debug output to stderr.
pub struct ConsoleReporter {
    tracker: Mutex<JobCompletionTracker>,
}

impl ConsoleReporter {
    /// `job_report_delay` controls how often new job totals are printed.
    pub fn new(job_report_delay: Duration) -> Self {
        Self {
            tracker: Mutex::new(JobCompletionTracker::new(0, job_report_delay)),
        }
    }

    fn print_jobs_completed(&self, total: u64) {
        self.report("STATS", &format!("Jobs completed: {total}"));
    }

    fn report(&self, scope: &str, msg: &str) {
        let now = chrono::Local::now().time().format("%H:%M:%S%.3f");
        let line = format!("[{now} {scope:>5}] {msg}\n");
        // Write errors are ignored: there is nothing useful to do here.
        let _ = stdout().write_all(line.as_bytes());
        let _ = stdout().flush();
    }
}

impl Drop for ConsoleReporter {
    fn drop(&mut self) {
        if let Ok(mut tracker) = self.tracker.lock() {
            let mut pending = None;
            tracker.flush(|n| pending = Some(n));
            if let Some(n) = pending {
                self.print_jobs_completed(n);
            }
        }
    }
}

impl Reporter for ConsoleReporter {
    fn debug_print(&self, msg: &str) {
        let _ = stderr().write_all(msg.as_bytes());
        let _ = stderr().flush();
    }

    fn info_activity(&self, msg: &str) {
        self.report("INFO", msg);
    }

    fn error_activity(&self, msg: &str) {
        self.report("ERROR", msg);
    }

    fn job_completed(&self) {
        let mut tracker = self.tracker.lock().expect("tracker lock poisoned");
        let mut reported = None;
        tracker.job_completed(|n| reported = Some(n));
        drop(tracker);
        if let Some(n) = reported {
            self.print_jobs_completed(n);
        }
    }
}

/// Collects every recorded event in memory. For tests.
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("events lock poisoned").clone()
    }

    fn record(&self, event: String) {
        self.events.lock().expect("events lock poisoned").push(event);
    }
}

impl Reporter for RecordingReporter {
    fn debug_print(&self, msg: &str) {
        self.record(format!("DEBUG: {msg}"));
    }

    fn info_activity(&self, msg: &str) {
        self.record(format!("INFO: {msg}"));
    }

    fn error_activity(&self, msg: &str) {
        self.record(format!("ERROR: {msg}"));
    }

    fn job_completed(&self) {
        self.record("JOB-COMPLETED".into());
    }
}
