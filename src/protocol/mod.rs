//! Peer protocol bridge.
//!
//! Bridges a single outbound request/response primitive into the sandbox.
//! All argument validation happens before any network access, against the
//! dynamic boundary values a module passes in; the host network layer
//! behind [`PeerNetwork`] owns dialing, transport and framing.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{SandboxError, SandboxResult};
use crate::value::{ByteChunks, Value};

/// A validated protocol request: remote multiaddress (with embedded peer
/// identifier), protocol name, request payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolRequest {
    pub remote_address: String,
    pub protocol_name: String,
    pub payload: Vec<u8>,
}

impl ProtocolRequest {
    /// Single parsing step over the boundary values: either a typed request
    /// or a typed validation error naming the offending runtime type.
    /// Checks run in argument order.
    pub fn parse(
        remote_address: &Value,
        protocol_name: &Value,
        payload: &Value,
    ) -> SandboxResult<Self> {
        let remote_address = remote_address
            .as_str()
            .ok_or(SandboxError::TypeMismatch {
                argument: "remoteAddress",
                expected: "string",
                found: remote_address.type_name(),
            })?
            .to_string();
        let protocol_name = protocol_name
            .as_str()
            .ok_or(SandboxError::TypeMismatch {
                argument: "protocolName",
                expected: "string",
                found: protocol_name.type_name(),
            })?
            .to_string();
        let payload = payload
            .as_bytes()
            .ok_or(SandboxError::TypeMismatch {
                argument: "requestPayload",
                expected: "Uint8Array",
                found: payload.type_name(),
            })?
            .to_vec();
        Ok(Self {
            remote_address,
            protocol_name,
            payload,
        })
    }
}

/// One dialed request, addressed to a specific peer.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub address: String,
    pub peer_id: String,
    pub protocol: String,
    pub payload: Vec<u8>,
}

/// The outbound peer-to-peer primitive supplied by the host.
#[async_trait]
pub trait PeerNetwork: Send + Sync {
    /// Identifier of the local peer node.
    fn local_peer_id(&self) -> String;

    /// Issue one request and await one response datagram.
    async fn request(&self, request: OutboundRequest) -> SandboxResult<Vec<u8>>;
}

/// Validates and forwards a single request/response exchange.
pub struct ProtocolBridge {
    network: Arc<dyn PeerNetwork>,
}

impl ProtocolBridge {
    pub fn new(network: Arc<dyn PeerNetwork>) -> Self {
        Self { network }
    }

    pub fn local_peer_id(&self) -> String {
        self.network.local_peer_id()
    }

    /// `requestProtocol(remoteAddress, protocolName, payload)`.
    ///
    /// The response is wrapped as a lazy single-pass chunk sequence; the
    /// current transport always yields exactly one chunk. No retries: any
    /// transport failure propagates to the caller unchanged.
    pub async fn request_protocol(
        &self,
        remote_address: &Value,
        protocol_name: &Value,
        payload: &Value,
    ) -> SandboxResult<ByteChunks> {
        let request = ProtocolRequest::parse(remote_address, protocol_name, payload)?;
        let peer_id = peer_id_component(&request.remote_address)
            .ok_or(SandboxError::MissingPeerId)?
            .to_string();

        let reply = self
            .network
            .request(OutboundRequest {
                address: request.remote_address,
                peer_id,
                protocol: request.protocol_name,
                payload: request.payload,
            })
            .await?;

        Ok(ByteChunks::from_single(reply))
    }
}

/// Extract the peer identifier embedded in a textual multiaddress.
///
/// The contract requires a `/p2p/<peer-id>` component; the identifier must
/// be non-empty base58 text. Deeper multiaddress validation belongs to the
/// host network layer.
fn peer_id_component(address: &str) -> Option<&str> {
    let mut found = None;
    let mut segments = address.split('/');
    // A well-formed multiaddress starts with an empty segment ("/ip4/...").
    while let Some(segment) = segments.next() {
        if segment == "p2p" {
            found = segments.next();
        }
    }
    found.filter(|id| is_base58(id))
}

fn is_base58(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() && !matches!(c, '0' | 'O' | 'I' | 'l'))
}
