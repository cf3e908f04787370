//! Sequential executor for module-declared test cases.
//!
//! Cases are collected in registration order and drained one at a time;
//! awaiting a case's deferred result is the only suspension point. A
//! failing case is recorded and never aborts the queue. After the report,
//! a failing run surfaces as [`SandboxError::TestsFailed`] so the hosting
//! process can observe a non-zero completion status.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{SandboxError, SandboxResult};
use crate::reporter::Reporter;
use crate::value::Value;

/// Where a test case was declared, for report grouping and failure output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    /// Final path segment, as shown in file headers.
    fn short_file(&self) -> &str {
        self.file
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.file)
    }
}

type DeferredResult = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A test case's zero-argument operation: either an immediate result or a
/// deferred one.
pub enum TestAction {
    Sync(Box<dyn FnOnce() -> anyhow::Result<()> + Send>),
    Deferred(Box<dyn FnOnce() -> DeferredResult + Send>),
}

impl TestAction {
    pub fn sync(f: impl FnOnce() -> anyhow::Result<()> + Send + 'static) -> Self {
        TestAction::Sync(Box::new(f))
    }

    pub fn deferred<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        TestAction::Deferred(Box::new(move || Box::pin(f())))
    }
}

/// A registered test case. Transitions Registered → Queued → Running →
/// Passed/Failed, driven only by the drain loop.
pub struct TestCase {
    pub name: String,
    pub location: SourceLocation,
    action: Option<TestAction>,
}

/// One failed case, with its rendered error.
#[derive(Debug, Clone)]
pub struct TestFailure {
    pub name: String,
    pub location: SourceLocation,
    pub message: String,
}

impl TestFailure {
    fn render(&self, style: &Style) -> String {
        format!(
            "{} {}\n{} {}",
            self.name,
            style.grey(&format!("=> {}", self.location)),
            style.bold_red("error:"),
            self.message,
        )
    }
}

/// Aggregate result of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: Vec<TestFailure>,
    pub duration: Duration,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.passed + self.failed.len()
    }
}

/// Renders the captured error of a failing case. Pluggable so a host can
/// substitute its own destructuring/formatting helper.
pub type ErrorFormatter = Arc<dyn Fn(&anyhow::Error) -> String + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Collecting,
    Draining,
    Reporting,
    Idle,
}

/// Sequential test executor for one isolate. Created lazily on first
/// registration; mutated only by its own drain loop.
pub struct TestRunState {
    phase: Phase,
    pending: VecDeque<TestCase>,
    registered: usize,
    passed: usize,
    failed: Vec<TestFailure>,
    started: Instant,
    elapsed: Option<Duration>,
    last_reported_file: Option<String>,
    out: Arc<dyn Reporter>,
    style: Style,
    format_error: ErrorFormatter,
}

impl TestRunState {
    pub fn new(out: Arc<dyn Reporter>, use_color: bool) -> Self {
        Self {
            phase: Phase::Collecting,
            pending: VecDeque::new(),
            registered: 0,
            passed: 0,
            failed: Vec::new(),
            started: Instant::now(),
            elapsed: None,
            last_reported_file: None,
            out,
            style: Style { color: use_color },
            format_error: Arc::new(|err| format!("{err:#}")),
        }
    }

    pub fn with_error_formatter(mut self, format_error: ErrorFormatter) -> Self {
        self.format_error = format_error;
        self
    }

    /// Register a case. The name arrives as a boundary value and is
    /// validated synchronously; invalid shapes never enter the queue.
    pub fn register(
        &mut self,
        name: &Value,
        action: TestAction,
        location: SourceLocation,
    ) -> SandboxResult<()> {
        let name = name
            .as_str()
            .ok_or(SandboxError::TypeMismatch {
                argument: "name",
                expected: "string",
                found: name.type_name(),
            })?
            .to_string();

        self.pending.push_back(TestCase {
            name,
            location,
            action: Some(action),
        });
        self.registered += 1;
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drain the queue, strictly in registration order, one case in flight,
    /// then report. Returns `TestsFailed` after a failing run so the host
    /// can exit non-zero.
    ///
    /// The drain runs at most once per run state; later calls replay the
    /// recorded outcome without printing anything.
    pub async fn run_to_completion(&mut self) -> SandboxResult<RunSummary> {
        if self.phase == Phase::Collecting {
            self.phase = Phase::Draining;
            while let Some(case) = self.pending.pop_front() {
                // Awaiting the case is the sole suspension point of the runner.
                self.run_case(case).await;
            }

            self.phase = Phase::Reporting;
            self.elapsed = Some(self.started.elapsed());
            let summary = self.summary();
            if self.registered > 0 {
                self.report(&summary);
            }
            self.phase = Phase::Idle;
        }

        let summary = self.summary();
        if summary.failed.is_empty() {
            Ok(summary)
        } else {
            Err(SandboxError::TestsFailed {
                failed: summary.failed.len(),
                total: summary.total(),
            })
        }
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            passed: self.passed,
            failed: self.failed.clone(),
            duration: self.elapsed.unwrap_or_else(|| self.started.elapsed()),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    async fn run_case(&mut self, mut case: TestCase) {
        let started = Instant::now();
        let action = match case.action.take() {
            Some(action) => action,
            None => return,
        };
        let result = match action {
            TestAction::Sync(f) => match catch_unwind(AssertUnwindSafe(f)) {
                Ok(result) => result,
                Err(panic) => Err(anyhow::anyhow!("{}", panic_message(&*panic))),
            },
            TestAction::Deferred(f) => f().await,
        };

        let elapsed = started.elapsed();
        match result {
            Ok(()) => {
                self.passed += 1;
                self.log_case(&case, true, elapsed);
            }
            Err(error) => {
                let message = (self.format_error)(&error);                self.log_case(&case, false, elapsed);
                self.failed.push(TestFailure {
                    name: case.name,
                    location: case.location,
                    message,
                });
            }
        }
    }

    fn log_case(&mut self, case: &TestCase, passed: bool, elapsed: Duration) {
        if self.last_reported_file.as_deref() != Some(case.location.file.as_str()) {
            self.out
                .debug_print(&format!("\n{}\n", case.location.short_file()));
            self.last_reported_file = Some(case.location.file.clone());
        }

        let glyph = if passed {
            self.style.green("\u{2714}")
        } else {
            self.style.red("\u{2716}")
        };
        let timing = self.style.grey(&format!("({}ms)", elapsed.as_millis()));
        self.out
            .debug_print(&format!("  {glyph} {} {timing}\n", case.name));
    }

    fn report(&self, summary: &RunSummary) {
        if !summary.failed.is_empty() {
            // Extra spaces are intentional: they show the red background.
            self.out
                .debug_print(&format!("\n{}\n", self.style.white_on_red(" FAILURES ")));
            for failure in &summary.failed {
                self.out
                    .debug_print(&format!("\n{}\n", failure.render(&self.style)));
            }
        }

        let verdict = if summary.failed.is_empty() {
            self.style.green("ok")
        } else {
            self.style.red("FAIL")
        };
        let timing = self
            .style
            .grey(&format!("({}ms)", summary.duration.as_millis()));
        let trailer = if summary.failed.is_empty() { "\n" } else { "" };
        self.out.debug_print(&format!(
            "\n{verdict} | {} passed | {} failed {timing}{trailer}\n",
            summary.passed,
            summary.failed.len(),
        ));
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "test panicked".to_string()
    }
}

/// ANSI styling honoring the bootstrap color flags.
#[derive(Debug, Clone, Copy)]
struct Style {
    color: bool,
}

impl Style {
    fn stylize(&self, text: &str, code: &str) -> String {
        if self.color {
            format!("\u{1b}[{code}m{text}\u{1b}[0m")
        } else {
            text.to_string()
        }
    }

    fn green(&self, text: &str) -> String {
        self.stylize(text, "32")
    }

    fn red(&self, text: &str) -> String {
        self.stylize(text, "31")
    }

    fn bold_red(&self, text: &str) -> String {
        self.stylize(text, "1;31")
    }

    fn grey(&self, text: &str) -> String {
        // white + dim
        self.stylize(text, "2;37")
    }

    fn white_on_red(&self, text: &str) -> String {
        self.stylize(text, "37;41")
    }
}
