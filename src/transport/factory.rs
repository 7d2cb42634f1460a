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

//! Transport construction, dispatched on the configured kind.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::{SseClientConfig, SseServerConfig, StdioClientConfig, TransportKind};
use crate::core::errors::BridgeError;
use crate::transport::sse_client::SseClientTransport;
use crate::transport::sse_server::SseServerTransport;
use crate::transport::stdio_client::StdioClientTransport;
use crate::transport::stdio_server::StdioServerTransport;
use crate::transport::Transport;

/// Produces ready transports from a kind tag and an opaque config map.
///
/// The bridge talks to its factory through this trait so tests can hand
/// out mock transports.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create_server(
        &self,
        kind: TransportKind,
        config: &Map<String, Value>,
    ) -> Result<Arc<dyn Transport>, BridgeError>;

    async fn create_client(
        &self,
        kind: TransportKind,
        config: &Map<String, Value>,
    ) -> Result<Arc<dyn Transport>, BridgeError>;
}

/// Factory producing the built-in transports.
pub struct DefaultTransportFactory;

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn create_server(
        &self,
        kind: TransportKind,
        config: &Map<String, Value>,
    ) -> Result<Arc<dyn Transport>, BridgeError> {
        match kind {
            TransportKind::Stdio => Ok(Arc::new(StdioServerTransport::new())),
            TransportKind::Sse => {
                let config = SseServerConfig::from_map(config)?;
                Ok(Arc::new(SseServerTransport::bind(&config).await?))
            }
        }
    }

    async fn create_client(
        &self,
        kind: TransportKind,
        config: &Map<String, Value>,
    ) -> Result<Arc<dyn Transport>, BridgeError> {
        match kind {
            TransportKind::Stdio => {
                let config = StdioClientConfig::from_map(config)?;
                Ok(Arc::new(StdioClientTransport::spawn(&config)?))
            }
            TransportKind::Sse => {
                let config = SseClientConfig::from_map(config)?;
                Ok(Arc::new(SseClientTransport::connect(&config).await?))
            }
        }
    }
}

/// Builds a server-side transport. `kind` is matched case-insensitively;
/// unknown kinds fail with [`BridgeError::UnsupportedTransport`].
pub async fn create_server_transport(
    kind: &str,
    config: &Map<String, Value>,
) -> Result<Arc<dyn Transport>, BridgeError> {
    DefaultTransportFactory
        .create_server(TransportKind::parse(kind)?, config)
        .await
}

/// Builds a client-side transport. `kind` is matched case-insensitively.
pub async fn create_client_transport(
    kind: &str,
    config: &Map<String, Value>,
) -> Result<Arc<dyn Transport>, BridgeError> {
    DefaultTransportFactory
        .create_client(TransportKind::parse(kind)?, config)
        .await
}
