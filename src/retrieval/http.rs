//! Production `RemoteFetch` backed by reqwest.
//!
//! Automatic redirect following is disabled so every hop can be recorded in
//! the response's locator history; the interceptor rewrites that history
//! hop-by-hop before a sandboxed module sees it.

use async_trait::async_trait;

use reqwest::header::{HeaderMap, AUTHORIZATION, COOKIE, LOCATION, PROXY_AUTHORIZATION};
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use crate::error::{SandboxError, SandboxResult};
use crate::value::ByteChunks;

use super::{GuardMode, RemoteFetch, RetrievalRequest, RetrievalResponse};

const MAX_REDIRECTS: usize = 10;

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(agent_version: &str) -> SandboxResult<Self> {
        let client = Client::builder()
            .user_agent(agent_version)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| SandboxError::Network(e.into()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RemoteFetch for HttpFetcher {
    async fn dispatch(&self, request: RetrievalRequest) -> SandboxResult<RetrievalResponse> {
        let mut url = Url::parse(&request.locator).map_err(|e| {
            SandboxError::Network(anyhow::anyhow!(
                "invalid locator '{}': {e}",
                request.locator
            ))
        })?;
        let mut headers = request.headers.clone();
        let mut body = (!request.body.is_empty()).then(|| request.body.clone());
        let mut history = vec![url.to_string()];

        for _ in 0..=MAX_REDIRECTS {
            let mut builder = self.client.get(url.clone()).headers(headers.clone());
            if let Some(bytes) = &body {
                builder = builder.body(bytes.clone());
            }
            let response = builder
                .send()
                .await
                .map_err(|e| SandboxError::Network(e.into()))?;

            let status = response.status();
            let hop = next_hop(&url, status, response.headers().get(LOCATION));
            match hop {
                Some(next) => {
                    debug!(from = %url, to = %next, "following redirect");
                    // Credentials are scoped to the origin that carried
                    // them; a hop elsewhere must not transmit them.
                    if !same_origin(&url, &next) {
                        strip_sensitive_headers(&mut headers);
                    }
                    if status == StatusCode::SEE_OTHER {
                        body = None;
                    }
                    history.push(next.to_string());
                    url = next;
                }
                None => {
                    let status = status.as_u16();
                    let headers = response.headers().clone();
                    let bytes = response
                        .bytes()
                        .await
                        .map_err(|e| SandboxError::Network(e.into()))?;
                    return Ok(RetrievalResponse {
                        status,
                        headers,
                        locator_history: history,
                        body: ByteChunks::from_single(bytes.to_vec()),
                        guard: GuardMode::Immutable,
                    });
                }
            }
        }

        Err(SandboxError::Network(anyhow::anyhow!(
            "too many redirects (limit: {MAX_REDIRECTS}) fetching {}",
            request.locator
        )))
    }
}

fn strip_sensitive_headers(headers: &mut HeaderMap) {
    headers.remove(AUTHORIZATION);
    headers.remove(COOKIE);
    headers.remove(PROXY_AUTHORIZATION);
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// The next redirect target, if the response asks for one. A redirect
/// status without a usable Location header ends the chain and the response
/// is returned as final.
fn next_hop(
    current: &Url,
    status: StatusCode,
    location: Option<&reqwest::header::HeaderValue>,
) -> Option<Url> {
    if !status.is_redirection() {
        return None;
    }
    let target = location?.to_str().ok()?;
    current.join(target).ok()
}
