// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bridge configuration.
//!
//! [`BridgeConfig`] is the immutable value a [`crate::Bridge`] is built
//! from: a transport kind plus an opaque configuration map for each side,
//! and the server-shutdown policy. The per-kind typed configs in this
//! module are what the factory projects those opaque maps into.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::errors::BridgeError;

/// Recognized transport kinds. Parsed case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TransportKind {
    Stdio,
    Sse,
}

impl TransportKind {
    pub fn parse(s: &str) -> Result<Self, BridgeError> {
        match s.to_ascii_lowercase().as_str() {
            "stdio" => Ok(TransportKind::Stdio),
            "sse" => Ok(TransportKind::Sse),
            other => Err(BridgeError::UnsupportedTransport(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
        }
    }
}

impl FromStr for TransportKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for TransportKind {
    type Error = BridgeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<TransportKind> for String {
    fn from(kind: TransportKind) -> Self {
        kind.as_str().to_string()
    }
}

/// What happens when the server-side transport closes while the bridge
/// is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ShutdownPolicy {
    /// Tear the whole bridge down.
    #[default]
    ShutdownBridge,
    /// Close the client and wait for a new server transport to take the
    /// old one's place.
    WaitForReconnection,
}

impl ShutdownPolicy {
    pub fn parse(s: &str) -> Result<Self, BridgeError> {
        match s.to_ascii_lowercase().as_str() {
            "shutdownbridge" => Ok(ShutdownPolicy::ShutdownBridge),
            "waitforreconnection" => Ok(ShutdownPolicy::WaitForReconnection),
            other => Err(BridgeError::InvalidConfig(format!(
                "unknown server shutdown behavior: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownPolicy::ShutdownBridge => "shutdownBridge",
            ShutdownPolicy::WaitForReconnection => "waitForReconnection",
        }
    }
}

impl fmt::Display for ShutdownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for ShutdownPolicy {
    type Error = BridgeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ShutdownPolicy> for String {
    fn from(policy: ShutdownPolicy) -> Self {
        policy.as_str().to_string()
    }
}

/// JSON wire shape of a bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BridgeConfigWire {
    #[serde(rename = "serverTransportType")]
    server_transport_type: TransportKind,
    #[serde(rename = "clientTransportType")]
    client_transport_type: TransportKind,
    #[serde(rename = "serverShutdownBehavior", default)]
    server_shutdown_behavior: ShutdownPolicy,
    #[serde(rename = "serverConfig", default)]
    server_config: Map<String, Value>,
    #[serde(rename = "clientConfig", default)]
    client_config: Map<String, Value>,
}

/// Immutable bridge configuration.
///
/// The transport configuration maps are opaque here; they are projected
/// into the typed per-kind configs by the transport factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "BridgeConfigWire", into = "BridgeConfigWire")]
pub struct BridgeConfig {
    server_transport_kind: TransportKind,
    client_transport_kind: TransportKind,
    server_shutdown_policy: ShutdownPolicy,
    server_transport_config: Map<String, Value>,
    client_transport_config: Map<String, Value>,
}

impl BridgeConfig {
    pub fn new(
        server_transport_kind: TransportKind,
        client_transport_kind: TransportKind,
        server_transport_config: Map<String, Value>,
        client_transport_config: Map<String, Value>,
        server_shutdown_policy: ShutdownPolicy,
    ) -> Self {
        // A stdio server is bound to the lifetime of the connected peer
        // process; its exit cannot be waited through. Only the effective
        // policy is recorded.
        let effective = if server_transport_kind == TransportKind::Stdio {
            ShutdownPolicy::ShutdownBridge
        } else {
            server_shutdown_policy
        };

        Self {
            server_transport_kind,
            client_transport_kind,
            server_shutdown_policy: effective,
            server_transport_config,
            client_transport_config,
        }
    }

    pub fn server_transport_kind(&self) -> TransportKind {
        self.server_transport_kind
    }

    pub fn client_transport_kind(&self) -> TransportKind {
        self.client_transport_kind
    }

    /// The effective server-shutdown policy.
    pub fn server_shutdown_policy(&self) -> ShutdownPolicy {
        self.server_shutdown_policy
    }

    pub fn server_transport_config(&self) -> &Map<String, Value> {
        &self.server_transport_config
    }

    pub fn client_transport_config(&self) -> &Map<String, Value> {
        &self.client_transport_config
    }
}

impl From<BridgeConfigWire> for BridgeConfig {
    fn from(wire: BridgeConfigWire) -> Self {
        BridgeConfig::new(
            wire.server_transport_type,
            wire.client_transport_type,
            wire.server_config,
            wire.client_config,
            wire.server_shutdown_behavior,
        )
    }
}

impl From<BridgeConfig> for BridgeConfigWire {
    fn from(config: BridgeConfig) -> Self {
        BridgeConfigWire {
            server_transport_type: config.server_transport_kind,
            client_transport_type: config.client_transport_kind,
            server_shutdown_behavior: config.server_shutdown_policy,
            server_config: config.server_transport_config,
            client_config: config.client_transport_config,
        }
    }
}

fn to_map<T: Serialize>(config: &T) -> Map<String, Value> {
    match serde_json::to_value(config) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Config for the stdio client transport (spawned child process).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StdioClientConfig {
    pub command: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

impl StdioClientConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn from_map(map: &Map<String, Value>) -> Result<Self, BridgeError> {
        serde_json::from_value(Value::Object(map.clone()))
            .map_err(|e| BridgeError::InvalidConfig(format!("stdio client: {e}")))
    }

    pub fn to_map(&self) -> Map<String, Value> {
        to_map(self)
    }
}

fn default_port() -> u16 {
    8080
}

fn default_endpoint() -> String {
    "/sse".to_string()
}

fn default_messages_endpoint() -> String {
    "/messages".to_string()
}

/// Config for the SSE server transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SseServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_messages_endpoint")]
    pub messages_endpoint: String,
    #[serde(default)]
    pub fallback_ports: Vec<u16>,
    /// When set, incoming connections must carry a matching bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for SseServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            endpoint: default_endpoint(),
            messages_endpoint: default_messages_endpoint(),
            fallback_ports: Vec::new(),
            auth_token: None,
        }
    }
}

impl SseServerConfig {
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, BridgeError> {
        serde_json::from_value(Value::Object(map.clone()))
            .map_err(|e| BridgeError::InvalidConfig(format!("sse server: {e}")))
    }

    pub fn to_map(&self) -> Map<String, Value> {
        to_map(self)
    }
}

/// Config for the SSE client transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SseClientConfig {
    pub server_url: String,
    /// Extra request headers, typically `Authorization: Bearer <token>`.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl SseClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            headers: HashMap::new(),
        }
    }

    pub fn from_map(map: &Map<String, Value>) -> Result<Self, BridgeError> {
        serde_json::from_value(Value::Object(map.clone()))
            .map_err(|e| BridgeError::InvalidConfig(format!("sse client: {e}")))
    }

    pub fn to_map(&self) -> Map<String, Value> {
        to_map(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_case_insensitive() {
        assert_eq!(TransportKind::parse("STDIO").unwrap(), TransportKind::Stdio);
        assert_eq!(TransportKind::parse("Sse").unwrap(), TransportKind::Sse);
        assert!(matches!(
            TransportKind::parse("websocket"),
            Err(BridgeError::UnsupportedTransport(_))
        ));
    }

    #[test]
    fn test_shutdown_policy_case_insensitive() {
        assert_eq!(
            ShutdownPolicy::parse("WaitForReconnection").unwrap(),
            ShutdownPolicy::WaitForReconnection
        );
        assert_eq!(
            ShutdownPolicy::parse("shutdownbridge").unwrap(),
            ShutdownPolicy::ShutdownBridge
        );
        assert!(ShutdownPolicy::parse("explode").is_err());
    }

    #[test]
    fn test_stdio_server_forces_shutdown_policy() {
        let config = BridgeConfig::new(
            TransportKind::Stdio,
            TransportKind::Sse,
            Map::new(),
            Map::new(),
            ShutdownPolicy::WaitForReconnection,
        );
        assert_eq!(
            config.server_shutdown_policy(),
            ShutdownPolicy::ShutdownBridge
        );
    }

    #[test]
    fn test_sse_server_keeps_requested_policy() {
        let config = BridgeConfig::new(
            TransportKind::Sse,
            TransportKind::Stdio,
            Map::new(),
            Map::new(),
            ShutdownPolicy::WaitForReconnection,
        );
        assert_eq!(
            config.server_shutdown_policy(),
            ShutdownPolicy::WaitForReconnection
        );
    }

    #[test]
    fn test_stdio_client_config_requires_command() {
        let map = Map::new();
        assert!(matches!(
            StdioClientConfig::from_map(&map),
            Err(BridgeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_sse_server_config_defaults() {
        let config = SseServerConfig::from_map(&Map::new()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.endpoint, "/sse");
        assert_eq!(config.messages_endpoint, "/messages");
        assert!(config.fallback_ports.is_empty());
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn test_sse_client_config_requires_server_url() {
        assert!(matches!(
            SseClientConfig::from_map(&Map::new()),
            Err(BridgeError::InvalidConfig(_))
        ));
    }
}
