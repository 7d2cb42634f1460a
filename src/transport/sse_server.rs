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

//! HTTP SSE server transport.
//!
//! Exposes the bridge as an MCP SSE server: `GET <endpoint>` opens the
//! event stream (the first event advertises the messages endpoint) and
//! peers POST one frame per request to the messages endpoint. When an
//! auth token is configured, both routes require a matching bearer token.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::Router;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SseServerConfig;
use crate::core::errors::BridgeError;
use crate::core::events::InboundEvent;
use crate::transport::Transport;

/// Outbound frames buffered per SSE subscriber before it is considered
/// lagged and frames are dropped.
const OUTBOUND_BUFFER: usize = 1024;

struct ServerShared {
    outbound: broadcast::Sender<String>,
    inbound: mpsc::UnboundedSender<InboundEvent>,
    messages_endpoint: String,
    auth_token: Option<String>,
}

pub struct SseServerTransport {
    shared: Arc<ServerShared>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<InboundEvent>>,
    closed: CancellationToken,
    local_addr: SocketAddr,
}

impl SseServerTransport {
    pub async fn bind(config: &SseServerConfig) -> Result<Self, BridgeError> {
        if !config.endpoint.starts_with('/') || !config.messages_endpoint.starts_with('/') {
            return Err(BridgeError::InvalidConfig(
                "sse server: endpoints must start with '/'".to_string(),
            ));
        }
        if config.endpoint == config.messages_endpoint {
            return Err(BridgeError::InvalidConfig(
                "sse server: endpoint and messagesEndpoint must differ".to_string(),
            ));
        }

        let listener = bind_with_fallback(config).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| BridgeError::TransportCreateFailed(e.to_string()))?;

        let (outbound, _) = broadcast::channel(OUTBOUND_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        let shared = Arc::new(ServerShared {
            outbound,
            inbound: inbound_tx,
            messages_endpoint: config.messages_endpoint.clone(),
            auth_token: config.auth_token.clone(),
        });

        let app = Router::new()
            .route(&config.endpoint, get(sse_handler))
            .route(&config.messages_endpoint, post(messages_handler))
            .with_state(shared.clone());

        info!(%local_addr, endpoint = %config.endpoint, "SSE server listening");

        let serve_token = closed.clone();
        tokio::spawn(async move {
            let shutdown = serve_token.clone();
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                warn!("SSE server error: {e}");
            }
            serve_token.cancel();
        });

        Ok(Self {
            shared,
            inbound_rx: Mutex::new(inbound_rx),
            closed,
            local_addr,
        })
    }

    /// The address actually bound, which may be a fallback port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

async fn bind_with_fallback(config: &SseServerConfig) -> Result<TcpListener, BridgeError> {
    let mut ports = vec![config.port];
    ports.extend(&config.fallback_ports);

    let mut last_err = None;
    for port in ports {
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => {
                if port != config.port {
                    warn!(port, "primary port unavailable, bound to fallback");
                }
                return Ok(listener);
            }
            Err(e) => {
                debug!(port, "bind failed: {e}");
                last_err = Some(e);
            }
        }
    }

    Err(BridgeError::TransportCreateFailed(format!(
        "no usable port among {:?}: {}",
        config.port,
        last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no ports configured".to_string())
    )))
}

fn authorized(headers: &HeaderMap, token: &Option<String>) -> bool {
    let Some(expected) = token else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|candidate| candidate == expected)
        .unwrap_or(false)
}

async fn sse_handler(
    State(shared): State<Arc<ServerShared>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    if !authorized(&headers, &shared.auth_token) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let session_id = Uuid::new_v4();
    info!(%session_id, "SSE peer connected");

    let endpoint = format!("{}?sessionId={}", shared.messages_endpoint, session_id);
    let rx = shared.outbound.subscribe();

    let stream = futures_util::stream::once(async move {
        Ok(Event::default().event("endpoint").data(endpoint))
    })
    .chain(futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(message) => return Some((Ok(Event::default().data(message)), rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE subscriber lagged, frames dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn messages_handler(
    State(shared): State<Arc<ServerShared>>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    if !authorized(&headers, &shared.auth_token) {
        return StatusCode::UNAUTHORIZED;
    }
    if body.trim().is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    match shared.inbound.send(InboundEvent::Message(body)) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::GONE,
    }
}

#[async_trait]
impl Transport for SseServerTransport {
    async fn recv(&self) -> Option<InboundEvent> {
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => None,
            event = rx.recv() => event,
        }
    }

    async fn send(&self, message: &str) -> Result<(), BridgeError> {
        if self.closed.is_cancelled() {
            return Err(BridgeError::TransportClosed);
        }
        // No subscriber means no peer is connected yet; the frame is lost
        // either way, so this is not surfaced as an error.
        if self.shared.outbound.send(message.to_string()).is_err() {
            debug!("no SSE subscribers connected, frame dropped");
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.cancel();
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}
