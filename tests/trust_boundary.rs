//! End-to-end scenarios across the whole trust boundary: bootstrap an
//! isolate, exercise the installed capabilities, and drain a module test
//! run — all against in-memory host fakes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION};

use canopy::{
    BootstrapOptions, ByteChunks, FetchOptions, GatewayConfig, GuardMode, HostHandle, Isolate,
    OutboundRequest, PeerNetwork, RecordingReporter, RemoteFetch, RetrievalRequest,
    RetrievalResponse, SandboxError, SandboxResult, SourceLocation, TestAction, Value,
};

const PEER_ADDR: &str =
    "/ip4/10.0.0.7/tcp/4001/p2p/12D3KooWBdmLqTYtjfrSwfASdDjhZ149TJE4UKRDDCKiPxvM2aLG";

/// Host fetch fake: records requests, replays a scripted redirect chain.
struct FakeGatewayFetch {
    dispatched: Mutex<Vec<RetrievalRequest>>,
}

impl FakeGatewayFetch {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            dispatched: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<RetrievalRequest> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteFetch for FakeGatewayFetch {
    async fn dispatch(&self, request: RetrievalRequest) -> SandboxResult<RetrievalResponse> {
        self.dispatched.lock().unwrap().push(request.clone());
        // One internal gateway redirect before the final locator.
        let history = vec![
            request.locator.clone(),
            format!("{}?format=raw", request.locator),
        ];
        Ok(RetrievalResponse {
            status: 200,
            headers: HeaderMap::new(),
            locator_history: history,
            body: ByteChunks::from_single(b"file bytes".to_vec()),
            guard: GuardMode::Immutable,
        })
    }
}

/// Peer network fake implementing an echo-style protocol.
struct EchoPeerNetwork;

#[async_trait]
impl PeerNetwork for EchoPeerNetwork {
    fn local_peer_id(&self) -> String {
        "12D3KooWEchoLocalNode".into()
    }

    async fn request(&self, request: OutboundRequest) -> SandboxResult<Vec<u8>> {
        Ok(request.payload)
    }
}

fn bootstrapped(
    fetch: Arc<FakeGatewayFetch>,
    reporter: Arc<RecordingReporter>,
) -> Isolate {
    let options = BootstrapOptions {
        wallet_address: "f1qsandbox".into(),
        station_id: "station-e2e".into(),
        gateway: Some(GatewayConfig {
            endpoint: "http://127.0.0.1:41443".into(),
            auth_token: Some("gw-token".into()),
        }),
        ..Default::default()
    };
    let mut isolate = Isolate::new();
    isolate
        .initialize_environment(
            &options,
            HostHandle {
                remote_fetch: fetch,
                peer_network: Arc::new(EchoPeerNetwork),
                reporter,
            },
        )
        .expect("bootstrap");
    isolate
}

#[tokio::test]
async fn reserved_scheme_fetch_never_reveals_gateway() {
    let fetch = FakeGatewayFetch::new();
    let isolate = bootstrapped(fetch.clone(), Arc::new(RecordingReporter::new()));
    let env = isolate.env().unwrap();

    let response = env
        .fetch("ipfs://bafyHash/data.bin", FetchOptions::default())
        .await
        .unwrap();

    // The host saw the gateway form, with the credential attached.
    let sent = fetch.requests();
    assert_eq!(sent[0].locator, "http://127.0.0.1:41443/ipfs/bafyHash/data.bin");
    assert_eq!(sent[0].headers.get(AUTHORIZATION).unwrap(), "Bearer gw-token");

    // Every sandbox-observable locator carries the reserved scheme.
    assert_eq!(
        response.locator_history,
        vec![
            "ipfs://bafyHash/data.bin".to_string(),
            "ipfs://bafyHash/data.bin?format=raw".to_string(),
        ]
    );
    for locator in &response.locator_history {
        assert!(locator.starts_with("ipfs://"));
        assert!(!locator.contains("41443"));
    }
    assert_eq!(response.body.collect_remaining(), b"file bytes".to_vec());
}

#[tokio::test]
async fn forged_credentials_are_rejected_before_dispatch() {
    let fetch = FakeGatewayFetch::new();
    let isolate = bootstrapped(fetch.clone(), Arc::new(RecordingReporter::new()));
    let env = isolate.env().unwrap();

    let mut options = FetchOptions::default();
    options
        .headers
        .insert(AUTHORIZATION, "Bearer forged".parse().unwrap());

    let err = env
        .fetch("ipfs://bafyHash", options)
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::CredentialRejected));
    assert!(fetch.requests().is_empty());
}

#[tokio::test]
async fn plain_https_fetch_is_forwarded_untouched() {
    let fetch = FakeGatewayFetch::new();
    let isolate = bootstrapped(fetch.clone(), Arc::new(RecordingReporter::new()));
    let env = isolate.env().unwrap();

    env.fetch("https://stats.example/api", FetchOptions::default())
        .await
        .unwrap();

    let sent = fetch.requests();
    assert_eq!(sent[0].locator, "https://stats.example/api");
    assert!(!sent[0].headers.contains_key(AUTHORIZATION));
}

#[tokio::test]
async fn protocol_echo_round_trips_payload_bytes() {
    let isolate = bootstrapped(FakeGatewayFetch::new(), Arc::new(RecordingReporter::new()));
    let env = isolate.env().unwrap();

    let payload: Vec<u8> = (0u8..32).collect();
    let mut reply = env
        .request_protocol(
            &Value::from(PEER_ADDR),
            &Value::from("/ipfs/ping/1.0.0"),
            &Value::from(payload.clone()),
        )
        .await
        .unwrap();

    assert_eq!(reply.next_chunk(), Some(payload));
    assert_eq!(reply.next_chunk(), None);
}

#[tokio::test]
async fn activity_and_job_reports_reach_the_host() {
    let reporter = Arc::new(RecordingReporter::new());
    let isolate = bootstrapped(FakeGatewayFetch::new(), reporter.clone());
    let env = isolate.env().unwrap();

    env.call("activity.info", &[Value::from("probe finished")])
        .unwrap();
    env.call("jobCompleted", &[]).unwrap();

    assert_eq!(
        reporter.events(),
        vec!["INFO: probe finished".to_string(), "JOB-COMPLETED".to_string()]
    );
}

#[tokio::test]
async fn module_test_run_end_to_end() {
    let reporter = Arc::new(RecordingReporter::new());
    let mut isolate = bootstrapped(FakeGatewayFetch::new(), reporter.clone());
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let o = order.clone();
    isolate
        .register_test(
            &Value::from("a"),
            TestAction::sync(move || {
                o.lock().unwrap().push("a");
                Ok(())
            }),
            SourceLocation::new("module.test.js", 3, 1),
        )
        .unwrap();

    let o = order.clone();
    isolate
        .register_test(
            &Value::from("b"),
            TestAction::sync(move || {
                o.lock().unwrap().push("b");
                Err(anyhow::anyhow!("boom"))
            }),
            SourceLocation::new("module.test.js", 9, 1),
        )
        .unwrap();

    let o = order.clone();
    isolate
        .register_test(
            &Value::from("c"),
            TestAction::deferred(move || async move {
                assert_eq!(*o.lock().unwrap(), vec!["a", "b"]);
                tokio::time::sleep(Duration::from_millis(2)).await;
                o.lock().unwrap().push("c");
                Ok(())
            }),
            SourceLocation::new("module.test.js", 15, 1),
        )
        .unwrap();

    let err = isolate.run_tests().await.unwrap_err();
    assert!(matches!(
        err,
        SandboxError::TestsFailed {
            failed: 1,
            total: 3
        }
    ));
    assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);

    let output: String = reporter
        .events()
        .iter()
        .filter_map(|e| e.strip_prefix("DEBUG: ").map(str::to_string))
        .collect();
    assert!(output.contains("module.test.js"));
    assert!(output.contains("FAIL | 2 passed | 1 failed"));
    assert!(output.contains("boom"));
}

#[test]
fn double_bootstrap_is_rejected() {
    let mut isolate = bootstrapped(FakeGatewayFetch::new(), Arc::new(RecordingReporter::new()));
    let err = isolate
        .initialize_environment(
            &BootstrapOptions::default(),
            HostHandle {
                remote_fetch: FakeGatewayFetch::new(),
                peer_network: Arc::new(EchoPeerNetwork),
                reporter: Arc::new(RecordingReporter::new()),
            },
        )
        .unwrap_err();
    assert!(matches!(err, SandboxError::AlreadyBootstrapped));
    // The first installation still answers.
    assert_eq!(
        isolate.env().unwrap().read("walletAddress"),
        Some(Value::from("f1qsandbox"))
    );
}
