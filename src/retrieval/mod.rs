//! Content-addressed retrieval interception.
//!
//! Sandboxed modules fetch `ipfs://` locators; the interceptor resolves
//! them through a local gateway while keeping the gateway invisible and
//! un-forgeable. Everything the module can observe — including every hop of
//! the redirect history — carries the content-addressing scheme, never the
//! gateway's host-visible form.
//!
//! Request/response values are copy-on-rewrite: the interceptor never
//! mutates a caller-supplied value, it derives patched copies.

mod http;

pub use http::HttpFetcher;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::value::ByteChunks;

/// The reserved content-addressing scheme prefix.
pub const IPFS_SCHEME: &str = "ipfs://";

/// Whether a value may be rewritten by its holder.
///
/// Responses handed to the sandbox are immutable; the interceptor preserves
/// whatever mode the transport produced when it rebuilds a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardMode {
    Mutable,
    Immutable,
}

/// A canonical retrieval request: locator, ordered case-insensitive header
/// multimap, byte body, guard mode.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalRequest {
    pub locator: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub guard: GuardMode,
}

impl RetrievalRequest {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            headers: HeaderMap::new(),
            body: Vec::new(),
            guard: GuardMode::Mutable,
        }
    }

    /// Derived copy with a different locator; everything else carried over.
    pub fn with_locator(&self, locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            guard: self.guard,
        }
    }
}

/// A retrieval response. `locator_history` is ordered: the locator the
/// request was dispatched with first, then one entry per redirect hop.
#[derive(Debug)]
pub struct RetrievalResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub locator_history: Vec<String>,
    pub body: ByteChunks,
    pub guard: GuardMode,
}

impl RetrievalResponse {
    /// The locator the response was ultimately served from.
    pub fn final_locator(&self) -> Option<&str> {
        self.locator_history.last().map(String::as_str)
    }

    /// Rebuild with a patched history, preserving status, headers, body and
    /// guard mode.
    pub fn with_locator_history(self, locator_history: Vec<String>) -> Self {
        Self {
            locator_history,
            ..self
        }
    }
}

/// What a caller may pass as the `input` argument of `fetch`: a bare
/// locator string, a URL-like value, or a prebuilt request.
#[derive(Debug, Clone)]
pub enum FetchInput {
    Locator(String),
    Url(reqwest::Url),
    Request(RetrievalRequest),
}

impl From<&str> for FetchInput {
    fn from(s: &str) -> Self {
        FetchInput::Locator(s.to_string())
    }
}

impl From<String> for FetchInput {
    fn from(s: String) -> Self {
        FetchInput::Locator(s)
    }
}

impl From<reqwest::Url> for FetchInput {
    fn from(url: reqwest::Url) -> Self {
        FetchInput::Url(url)
    }
}

impl From<RetrievalRequest> for FetchInput {
    fn from(req: RetrievalRequest) -> Self {
        FetchInput::Request(req)
    }
}

/// Per-call options merged into the normalized request.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Appended to the request's header multimap.
    pub headers: HeaderMap,
    /// Replaces the request body when set.
    pub body: Option<Vec<u8>>,
}

/// The unrestricted fetch primitive supplied by the host.
///
/// Implementations must record every redirect hop in the response's
/// `locator_history`, starting with the dispatched locator.
#[async_trait]
pub trait RemoteFetch: Send + Sync {
    async fn dispatch(&self, request: RetrievalRequest) -> SandboxResult<RetrievalResponse>;
}

/// Fetch-scheme router: `ipfs://` locators go through the gateway, every
/// other scheme is forwarded opaquely.
pub struct RetrievalInterceptor {
    gateway_base: Option<String>,
    gateway_auth: Option<String>,
    remote: Arc<dyn RemoteFetch>,
}

impl RetrievalInterceptor {
    pub fn new(gateway: Option<&GatewayConfig>, remote: Arc<dyn RemoteFetch>) -> Self {
        Self {
            gateway_base: gateway.map(GatewayConfig::base),
            gateway_auth: gateway.and_then(|g| g.auth_token.clone()),
            remote,
        }
    }

    /// Resolve `input` + `options` into a canonical request and dispatch it.
    pub async fn fetch(
        &self,
        input: impl Into<FetchInput>,
        options: FetchOptions,
    ) -> SandboxResult<RetrievalResponse> {
        let request = normalize(input.into(), options);

        if !request.locator.starts_with(IPFS_SCHEME) {
            // Unrecognized scheme: opaque, forwarded unchanged.
            return self.remote.dispatch(request).await;
        }

        // The sandbox must never forge or override gateway credentials.
        if request.headers.contains_key(AUTHORIZATION) {
            warn!(locator = %request.locator, "rejected retrieval request carrying Authorization");
            return Err(SandboxError::CredentialRejected);
        }

        let base = self
            .gateway_base
            .as_deref()
            .ok_or(SandboxError::GatewayNotConfigured)?;

        let remainder = &request.locator[IPFS_SCHEME.len()..];
        let mut rewritten = request.with_locator(format!("{base}{remainder}"));
        if let Some(token) = &self.gateway_auth {
            // Host-side credential; invisible to the sandbox.
            let value = format!("Bearer {token}")
                .parse()
                .map_err(|e| SandboxError::Network(anyhow::Error::new(e)))?;
            rewritten.headers.insert(AUTHORIZATION, value);
        }

        debug!(from = %request.locator, to = %rewritten.locator, "rewrote retrieval locator");

        let response = self.remote.dispatch(rewritten).await?;
        Ok(self.conceal_gateway(response, base))
    }

    /// Map every gateway-prefixed entry of the redirect history back to the
    /// content-addressing scheme. Applied to every hop, not just the final
    /// locator.
    fn conceal_gateway(&self, response: RetrievalResponse, base: &str) -> RetrievalResponse {
        let history = response
            .locator_history
            .iter()
            .map(|entry| match entry.strip_prefix(base) {
                Some(rest) => format!("{IPFS_SCHEME}{rest}"),
                None => entry.clone(),
            })
            .collect();
        response.with_locator_history(history)
    }
}

/// Collapse the input/options pair into one derived request value.
fn normalize(input: FetchInput, options: FetchOptions) -> RetrievalRequest {
    let mut request = match input {
        FetchInput::Locator(locator) => RetrievalRequest::new(locator),
        FetchInput::Url(url) => RetrievalRequest::new(url.to_string()),
        FetchInput::Request(req) => req,
    };
    for (name, value) in &options.headers {
        request.headers.append(name, value.clone());
    }
    if let Some(body) = options.body {
        request.body = body;
    }
    request
}
