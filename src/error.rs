//! Boundary error taxonomy.
//!
//! Every error a sandboxed module can observe crosses this one enum. The
//! `TypeMismatch` and `MissingPeerId` messages are a compatibility contract:
//! modules match on the exact wording, so changing it is a breaking change.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    /// The environment for this isolate was already built. The first
    /// installation stays intact; only the second caller sees this.
    #[error("environment already bootstrapped for this isolate")]
    AlreadyBootstrapped,

    /// A reserved-scheme locator arrived before the retrieval gateway was
    /// configured. Never downgraded to a public-network fetch.
    #[error("retrieval gateway is not configured")]
    GatewayNotConfigured,

    /// Argument shape validation failed at the trust boundary.
    /// `found` is the boundary type name of the value actually passed.
    #[error("TypeError: {argument} must be {expected} (found: {found})")]
    TypeMismatch {
        argument: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    /// A sandboxed module tried to supply gateway credentials.
    #[error("retrieval requests must not carry an Authorization header")]
    CredentialRejected,

    /// The remote address parsed, but carries no peer identifier.
    #[error("Error: remote address must contain a valid peer ID")]
    MissingPeerId,

    /// Unknown or read-only capability entry on assignment.
    #[error("capability '{0}' is not writable")]
    NotWritable(String),

    /// Lookup of a capability entry that was never installed.
    #[error("no such capability: '{0}'")]
    UnknownCapability(String),

    /// Invocation of a capability entry that is not a host function.
    #[error("capability '{0}' is not callable")]
    NotCallable(String),

    /// Transport failure, passed through unwrapped so callers can tell it
    /// apart from validation failures.
    #[error(transparent)]
    Network(#[from] anyhow::Error),

    /// Raised after the test report when one or more cases failed, so the
    /// hosting process observes a non-zero completion status.
    #[error("{failed} of {total} tests failed")]
    TestsFailed { failed: usize, total: usize },
}

pub type SandboxResult<T> = Result<T, SandboxError>;
