//! Capability gate — builds the one-time restricted namespace exposed to
//! sandboxed code.
//!
//! The namespace is an ordered table of descriptors, each with a fixed
//! access mode enforced by the table itself, not by convention. Bootstrap
//! consumes the unrestricted [`HostHandle`] by value: after installation
//! the only paths to host internals are the installed entries.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::BootstrapOptions;
use crate::error::{SandboxError, SandboxResult};
use crate::protocol::{PeerNetwork, ProtocolBridge};
use crate::reporter::Reporter;
use crate::retrieval::{FetchInput, FetchOptions, RemoteFetch, RetrievalInterceptor, RetrievalResponse};
use crate::value::{ByteChunks, Value};

/// How a capability entry may be used after installation. Fixed at install
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    Writable,
    Accessor,
}

pub type AccessorFn = Arc<dyn Fn() -> Value + Send + Sync>;
pub type HostFn = Arc<dyn Fn(&[Value]) -> SandboxResult<Value> + Send + Sync>;

/// The value-or-accessor side of a descriptor.
#[derive(Clone)]
pub enum CapabilityEntry {
    /// Provided by the external standard-platform bundle; the gate only
    /// reserves the name and its mode.
    Platform,
    /// A plain data value.
    Data(Value),
    /// Computed on every read.
    Accessor(AccessorFn),
    /// A synchronous host call.
    HostFn(HostFn),
    /// The retrieval interceptor's fetch, dispatched asynchronously.
    Fetch,
    /// The protocol bridge's request/response primitive.
    RequestProtocol,
}

impl std::fmt::Debug for CapabilityEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapabilityEntry::Platform => write!(f, "Platform"),
            CapabilityEntry::Data(v) => f.debug_tuple("Data").field(v).finish(),
            CapabilityEntry::Accessor(_) => write!(f, "Accessor(..)"),
            CapabilityEntry::HostFn(_) => write!(f, "HostFn(..)"),
            CapabilityEntry::Fetch => write!(f, "Fetch"),
            CapabilityEntry::RequestProtocol => write!(f, "RequestProtocol"),
        }
    }
}

/// One named entry of the capability table.
#[derive(Debug, Clone)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub mode: AccessMode,
    pub entry: CapabilityEntry,
}

/// The unrestricted host internals used during bootstrap. Consumed by
/// value; no later code path can reach them except through installed
/// entries.
pub struct HostHandle {
    pub remote_fetch: Arc<dyn RemoteFetch>,
    pub peer_network: Arc<dyn PeerNetwork>,
    pub reporter: Arc<dyn Reporter>,
}

/// Fixed allow-list of standard-platform capabilities. The implementations
/// live in the external web-platform bundle; the gate reserves the names
/// and pins their modes.
const PLATFORM_ALLOW_LIST: &[(&str, AccessMode)] = &[
    ("AbortController", AccessMode::Writable),
    ("AbortSignal", AccessMode::Writable),
    ("CustomEvent", AccessMode::Writable),
    ("DOMException", AccessMode::Writable),
    ("Event", AccessMode::Writable),
    ("EventTarget", AccessMode::Writable),
    ("MessageChannel", AccessMode::Writable),
    ("MessagePort", AccessMode::Writable),
    ("ReadableStream", AccessMode::Writable),
    ("Request", AccessMode::Writable),
    ("Response", AccessMode::Writable),
    ("TextDecoder", AccessMode::Writable),
    ("TextEncoder", AccessMode::Writable),
    ("TransformStream", AccessMode::Writable),
    ("URL", AccessMode::Writable),
    ("URLSearchParams", AccessMode::Writable),
    ("WritableStream", AccessMode::Writable),
    ("atob", AccessMode::Writable),
    ("btoa", AccessMode::Writable),
    ("clearInterval", AccessMode::Writable),
    ("clearTimeout", AccessMode::Writable),
    ("console", AccessMode::Writable),
    ("crypto", AccessMode::ReadOnly),
    ("performance", AccessMode::Writable),
    ("reportError", AccessMode::Writable),
    ("setInterval", AccessMode::Writable),
    ("setTimeout", AccessMode::Writable),
    ("structuredClone", AccessMode::Writable),
];

/// The capability namespace reachable by sandboxed code. One per isolate;
/// shape is immutable after bootstrap, writable entries may be reassigned.
pub struct GlobalEnvironment {
    table: Vec<CapabilityDescriptor>,
    index: HashMap<String, usize>,
    retrieval: RetrievalInterceptor,
    protocol: ProtocolBridge,
    reporter: Arc<dyn Reporter>,
    use_color: bool,
}

impl GlobalEnvironment {
    /// Build the full namespace from the startup configuration, consuming
    /// the host handle. Callers enforce the once-per-isolate discipline;
    /// installation itself is all-or-nothing because no sandboxed code runs
    /// until this returns.
    pub fn bootstrap(options: &BootstrapOptions, host: HostHandle) -> Self {
        let HostHandle {
            remote_fetch,
            peer_network,
            reporter,
        } = host;

        let retrieval = RetrievalInterceptor::new(options.gateway.as_ref(), remote_fetch);
        let protocol = ProtocolBridge::new(peer_network.clone());

        let mut env = Self {
            table: Vec::new(),
            index: HashMap::new(),
            retrieval,
            protocol,
            reporter: reporter.clone(),
            use_color: options.use_color(),
        };

        for (name, mode) in PLATFORM_ALLOW_LIST {
            env.install(name, *mode, CapabilityEntry::Platform);
        }
        env.install("fetch", AccessMode::Writable, CapabilityEntry::Fetch);

        // The custom namespace. Entry modes are part of the contract.
        let network = peer_network;
        env.install(
            "peerId",
            AccessMode::Accessor,
            CapabilityEntry::Accessor(Arc::new(move || {
                Value::String(network.local_peer_id())
            })),
        );
        env.install(
            "requestProtocol",
            AccessMode::ReadOnly,
            CapabilityEntry::RequestProtocol,
        );

        let info_reporter = reporter.clone();
        env.install(
            "activity.info",
            AccessMode::ReadOnly,
            CapabilityEntry::HostFn(Arc::new(move |args| {
                info_reporter.info_activity(&coerce_message(args));
                Ok(Value::Null)
            })),
        );
        let error_reporter = reporter.clone();
        env.install(
            "activity.error",
            AccessMode::ReadOnly,
            CapabilityEntry::HostFn(Arc::new(move |args| {
                error_reporter.error_activity(&coerce_message(args));
                Ok(Value::Null)
            })),
        );
        let job_reporter = reporter;
        env.install(
            "jobCompleted",
            AccessMode::ReadOnly,
            CapabilityEntry::HostFn(Arc::new(move |_args| {
                job_reporter.job_completed();
                Ok(Value::Null)
            })),
        );

        env.install(
            "walletAddress",
            AccessMode::ReadOnly,
            CapabilityEntry::Data(Value::String(options.wallet_address.clone())),
        );
        env.install(
            "stationId",
            AccessMode::ReadOnly,
            CapabilityEntry::Data(Value::String(options.station_id.clone())),
        );
        env.install(
            "versions.runtime",
            AccessMode::ReadOnly,
            CapabilityEntry::Data(Value::String(options.versions.runtime.clone())),
        );
        env.install(
            "versions.engine",
            AccessMode::ReadOnly,
            CapabilityEntry::Data(Value::String(options.versions.engine.clone())),
        );
        env.install(
            "inspect",
            AccessMode::ReadOnly,
            CapabilityEntry::Data(Value::Bool(options.inspect)),
        );

        debug!(entries = env.table.len(), "capability namespace installed");
        env
    }

    fn install(&mut self, name: &str, mode: AccessMode, entry: CapabilityEntry) {
        debug_assert!(
            !self.index.contains_key(name),
            "duplicate capability entry: {name}"
        );
        self.index.insert(name.to_string(), self.table.len());
        self.table.push(CapabilityDescriptor {
            name: name.to_string(),
            mode,
            entry,
        });
    }

    /// Entry names in installation order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.table.iter().map(|d| d.name.as_str())
    }

    pub fn descriptor(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.index.get(name).map(|&i| &self.table[i])
    }

    /// Read a data-shaped entry. Accessor entries are computed per read;
    /// callable and platform entries have no data view and yield `None`.
    pub fn read(&self, name: &str) -> Option<Value> {
        match &self.descriptor(name)?.entry {
            CapabilityEntry::Data(v) => Some(v.clone()),
            CapabilityEntry::Accessor(get) => Some(get()),
            _ => None,
        }
    }

    /// Reassign a writable entry. The table's shape never changes: unknown
    /// names are rejected, as are read-only and accessor entries.
    pub fn assign(&mut self, name: &str, value: Value) -> SandboxResult<()> {
        let i = *self
            .index
            .get(name)
            .ok_or_else(|| SandboxError::UnknownCapability(name.to_string()))?;
        if self.table[i].mode != AccessMode::Writable {
            return Err(SandboxError::NotWritable(name.to_string()));
        }
        self.table[i].entry = CapabilityEntry::Data(value);
        Ok(())
    }

    /// Invoke a synchronous host-function entry.
    pub fn call(&self, name: &str, args: &[Value]) -> SandboxResult<Value> {
        let descriptor = self
            .descriptor(name)
            .ok_or_else(|| SandboxError::UnknownCapability(name.to_string()))?;
        match &descriptor.entry {
            CapabilityEntry::HostFn(f) => f(args),
            _ => Err(SandboxError::NotCallable(name.to_string())),
        }
    }

    /// The intercepted fetch capability.
    pub async fn fetch(
        &self,
        input: impl Into<FetchInput>,
        options: FetchOptions,
    ) -> SandboxResult<RetrievalResponse> {
        self.retrieval.fetch(input, options).await
    }

    /// The peer protocol capability.
    pub async fn request_protocol(
        &self,
        remote_address: &Value,
        protocol_name: &Value,
        payload: &Value,
    ) -> SandboxResult<ByteChunks> {
        self.protocol
            .request_protocol(remote_address, protocol_name, payload)
            .await
    }

    pub fn retrieval(&self) -> &RetrievalInterceptor {
        &self.retrieval
    }

    pub fn protocol(&self) -> &ProtocolBridge {
        &self.protocol
    }

    pub fn reporter(&self) -> &Arc<dyn Reporter> {
        &self.reporter
    }

    pub fn use_color(&self) -> bool {
        self.use_color
    }
}

/// Activity calls accept anything coercible to text; absent arguments
/// report as "null", mirroring the loose console-style contract.
fn coerce_message(args: &[Value]) -> String {
    match args.first() {
        Some(v) => v.to_string(),
        None => Value::Null.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OutboundRequest;
    use crate::reporter::RecordingReporter;
    use crate::retrieval::{GuardMode, RetrievalRequest};
    use async_trait::async_trait;
    use reqwest::header::HeaderMap;

    struct NullFetch;

    #[async_trait]
    impl RemoteFetch for NullFetch {
        async fn dispatch(&self, request: RetrievalRequest) -> SandboxResult<RetrievalResponse> {
            Ok(RetrievalResponse {
                status: 200,
                headers: HeaderMap::new(),
                locator_history: vec![request.locator],
                body: ByteChunks::empty(),
                guard: GuardMode::Immutable,
            })
        }
    }

    struct StaticPeer;

    #[async_trait]
    impl PeerNetwork for StaticPeer {
        fn local_peer_id(&self) -> String {
            "12D3KooWStaticPeer".into()
        }

        async fn request(&self, request: OutboundRequest) -> SandboxResult<Vec<u8>> {
            Ok(request.payload)
        }
    }

    fn bootstrap_with(reporter: Arc<RecordingReporter>) -> GlobalEnvironment {
        let options = BootstrapOptions {
            wallet_address: "f1abc".into(),
            station_id: "station-7".into(),
            ..Default::default()
        };
        GlobalEnvironment::bootstrap(
            &options,
            HostHandle {
                remote_fetch: Arc::new(NullFetch),
                peer_network: Arc::new(StaticPeer),
                reporter,
            },
        )
    }

    fn bootstrap() -> GlobalEnvironment {
        bootstrap_with(Arc::new(RecordingReporter::new()))
    }

    #[test]
    fn installs_platform_allow_list_and_custom_namespace() {
        let env = bootstrap();
        for (name, _) in PLATFORM_ALLOW_LIST {
            assert!(env.descriptor(name).is_some(), "missing platform entry {name}");
        }
        for name in [
            "fetch",
            "peerId",
            "requestProtocol",
            "activity.info",
            "activity.error",
            "jobCompleted",
            "walletAddress",
            "stationId",
            "versions.runtime",
            "versions.engine",
            "inspect",
        ] {
            assert!(env.descriptor(name).is_some(), "missing entry {name}");
        }
    }

    #[test]
    fn read_only_entries_reject_reassignment() {
        let mut env = bootstrap();
        let before = env.read("walletAddress");
        let err = env
            .assign("walletAddress", Value::from("f1mallory"))
            .unwrap_err();
        assert!(matches!(err, SandboxError::NotWritable(_)));
        assert_eq!(env.read("walletAddress"), before);
    }

    #[test]
    fn writable_entries_can_be_reassigned() {
        let mut env = bootstrap();
        env.assign("atob", Value::from("shimmed")).unwrap();
        assert_eq!(env.read("atob"), Some(Value::from("shimmed")));
    }

    #[test]
    fn shape_is_fixed_after_bootstrap() {
        let mut env = bootstrap();
        let err = env.assign("newGlobal", Value::Null).unwrap_err();
        assert!(matches!(err, SandboxError::UnknownCapability(_)));
    }

    #[test]
    fn accessor_entry_computes_peer_id() {
        let env = bootstrap();
        assert_eq!(
            env.descriptor("peerId").unwrap().mode,
            AccessMode::Accessor
        );
        assert_eq!(env.read("peerId"), Some(Value::from("12D3KooWStaticPeer")));
    }

    #[test]
    fn data_entries_carry_bootstrap_configuration() {
        let env = bootstrap();
        assert_eq!(env.read("walletAddress"), Some(Value::from("f1abc")));
        assert_eq!(env.read("stationId"), Some(Value::from("station-7")));
        assert_eq!(env.read("inspect"), Some(Value::Bool(false)));
    }

    #[test]
    fn activity_calls_route_to_reporter() {
        let reporter = Arc::new(RecordingReporter::new());
        let env = bootstrap_with(reporter.clone());

        env.call("activity.info", &[Value::from("retrieval started")])
            .unwrap();
        env.call("activity.error", &[Value::Number(7.0)]).unwrap();
        env.call("jobCompleted", &[]).unwrap();

        assert_eq!(
            reporter.events(),
            vec![
                "INFO: retrieval started".to_string(),
                "ERROR: 7".to_string(),
                "JOB-COMPLETED".to_string(),
            ]
        );
    }

    #[test]
    fn calling_a_data_entry_fails() {
        let env = bootstrap();
        let err = env.call("walletAddress", &[]).unwrap_err();
        assert!(matches!(err, SandboxError::NotCallable(_)));
    }

    #[test]
    fn callable_entries_have_no_data_view() {
        let env = bootstrap();
        assert_eq!(env.read("requestProtocol"), None);
        assert_eq!(env.read("fetch"), None);
    }

    #[test]
    fn request_protocol_mode_is_read_only() {
        let mut env = bootstrap();
        let err = env
            .assign("requestProtocol", Value::Null)
            .unwrap_err();
        assert!(matches!(err, SandboxError::NotWritable(_)));
    }

    #[tokio::test]
    async fn fetch_entry_routes_through_interceptor() {
        let env = bootstrap();
        // Default options carry no gateway; the reserved scheme must fail
        // fast instead of hitting the network.
        let err = env
            .fetch("ipfs://bafyCID", FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::GatewayNotConfigured));
    }

    #[tokio::test]
    async fn request_protocol_routes_through_bridge() {
        let env = bootstrap();
        let reply = env
            .request_protocol(
                &Value::from("/ip4/1.2.3.4/tcp/1/p2p/QmSomePeerSomePeerSomePeerSomePeerSome"),
                &Value::from("/echo/1.0.0"),
                &Value::from(vec![5u8, 6]),
            )
            .await
            .unwrap();
        assert_eq!(reply.collect_remaining(), vec![5u8, 6]);
    }
}
