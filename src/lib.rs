//! canopy — the trust boundary of a sandbox for untrusted script modules.
//!
//! Decides exactly which host capabilities a module can reach, intercepts
//! a content-addressed retrieval scheme so modules fetch data without
//! learning where the gateway lives, bridges a single peer request/response
//! primitive into the sandbox, and runs module-declared test cases with
//! deterministic, serialized semantics.
//!
//! Architecture:
//! - `gate` — builds the one-time capability namespace per isolate
//! - `retrieval` — fetch-scheme router hiding the local gateway
//! - `protocol` — validated single-exchange peer bridge
//! - `testrun` — sequential module test executor
//! - `isolate` — explicit per-module context owning the above
//! - `reporter`, `config`, `value`, `error` — shared seams

pub mod config;
pub mod error;
pub mod gate;
pub mod isolate;
pub mod protocol;
pub mod reporter;
pub mod retrieval;
pub mod testrun;
pub mod value;

pub use config::{BootstrapOptions, GatewayConfig, VersionInfo};
pub use error::{SandboxError, SandboxResult};
pub use gate::{AccessMode, CapabilityDescriptor, CapabilityEntry, GlobalEnvironment, HostHandle};
pub use isolate::Isolate;
pub use protocol::{OutboundRequest, PeerNetwork, ProtocolBridge, ProtocolRequest};
pub use reporter::{ConsoleReporter, JobCompletionTracker, RecordingReporter, Reporter};
pub use retrieval::{
    FetchInput, FetchOptions, GuardMode, HttpFetcher, RemoteFetch, RetrievalInterceptor,
    RetrievalRequest, RetrievalResponse, IPFS_SCHEME,
};
pub use testrun::{RunSummary, SourceLocation, TestAction, TestFailure, TestRunState};
pub use value::{ByteChunks, Value};
