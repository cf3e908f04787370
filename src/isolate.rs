//! Isolate manager — one execution context per sandboxed module.
//!
//! The host embedding model funnels everything through one namespace
//! object, so both the capability table and the test run state live here as
//! explicitly owned context, with lifecycle bound to the isolate. Dropping
//! the isolate tears both down.

use crate::config::BootstrapOptions;
use crate::error::{SandboxError, SandboxResult};
use crate::gate::{GlobalEnvironment, HostHandle};
use crate::testrun::{RunSummary, SourceLocation, TestAction, TestRunState};
use crate::value::Value;

/// One execution context hosting a sandboxed module and its capability
/// namespace.
#[derive(Default)]
pub struct Isolate {
    env: Option<GlobalEnvironment>,
    tests: Option<TestRunState>,
}

impl Isolate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and install the capability namespace. Runs exactly once: a
    /// second call fails and leaves the first installation untouched.
    pub fn initialize_environment(
        &mut self,
        options: &BootstrapOptions,
        host: HostHandle,
    ) -> SandboxResult<()> {
        if self.env.is_some() {
            return Err(SandboxError::AlreadyBootstrapped);
        }
        self.env = Some(GlobalEnvironment::bootstrap(options, host));
        Ok(())
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.env.is_some()
    }

    /// The installed namespace, if bootstrap has run.
    pub fn env(&self) -> Option<&GlobalEnvironment> {
        self.env.as_ref()
    }

    pub fn env_mut(&mut self) -> Option<&mut GlobalEnvironment> {
        self.env.as_mut()
    }

    /// Register a module-declared test case. Test registration is part of
    /// the installed namespace, so it requires bootstrap; the run state is
    /// created lazily on the first registration.
    pub fn register_test(
        &mut self,
        name: &Value,
        action: TestAction,
        location: SourceLocation,
    ) -> SandboxResult<()> {
        let env = self
            .env
            .as_ref()
            .ok_or_else(|| SandboxError::UnknownCapability("test".to_string()))?;
        let tests = self.tests.get_or_insert_with(|| {
            TestRunState::new(env.reporter().clone(), env.use_color())
        });
        tests.register(name, action, location)
    }

    /// Drain all registered cases to completion and report. With no
    /// registrations this is a no-op returning an empty summary.
    pub async fn run_tests(&mut self) -> SandboxResult<RunSummary> {
        match self.tests.as_mut() {
            Some(tests) => tests.run_to_completion().await,
            None => Ok(RunSummary {
                passed: 0,
                failed: Vec::new(),
                duration: std::time::Duration::ZERO,
            }),
        }
    }
}
