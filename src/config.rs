//! Bootstrap configuration — supplied once by the host, immutable afterward.
//!
//! The host process assembles one [`BootstrapOptions`] value before the
//! first module body runs. Everything the capability gate installs is
//! derived from it; nothing here can be changed from inside the sandbox.

use serde::{Deserialize, Serialize};

/// Where content-addressed locators are resolved, and how to authenticate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base endpoint of the local retrieval gateway, e.g. `http://127.0.0.1:41443`.
    pub endpoint: String,
    /// Bearer credential attached to gateway requests on the host side.
    /// Sandboxed modules never see this value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl GatewayConfig {
    /// The gateway base used for locator rewriting: `<endpoint>/ipfs/`.
    pub fn base(&self) -> String {
        format!("{}/ipfs/", self.endpoint.trim_end_matches('/'))
    }
}

/// Version strings exposed to sandboxed code as read-only entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Version of this runtime.
    pub runtime: String,
    /// Version of the underlying script engine.
    pub engine: String,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            runtime: env!("CARGO_PKG_VERSION").to_string(),
            engine: String::new(),
        }
    }
}

/// Immutable startup configuration for one isolate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapOptions {
    /// Disable ANSI colors in module-visible output.
    pub no_color: bool,
    /// Whether stdout is a terminal.
    pub is_tty: bool,
    /// Whether console output should be routed through the inspector.
    pub inspect: bool,
    /// Wallet address the module reports rewards against.
    pub wallet_address: String,
    /// Stable identifier of the hosting station.
    pub station_id: String,
    /// Retrieval gateway endpoint + credential. `None` means reserved-scheme
    /// fetches fail fast with a configuration error.
    pub gateway: Option<GatewayConfig>,
    /// Version strings surfaced to modules.
    pub versions: VersionInfo,
    /// User agent string for outbound requests.
    pub agent_version: String,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            no_color: false,
            is_tty: false,
            inspect: false,
            wallet_address: String::new(),
            station_id: String::new(),
            gateway: None,
            versions: VersionInfo::default(),
            agent_version: format!("canopy/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl BootstrapOptions {
    /// True when module-visible output should use ANSI colors.
    pub fn use_color(&self) -> bool {
        !self.no_color && self.is_tty
    }
}
