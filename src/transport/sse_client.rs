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

//! HTTP SSE client transport.
//!
//! Opens an outbound event stream against a remote MCP SSE server and
//! POSTs frames to the messages endpoint the server advertises in its
//! first event. A failed stream closes the transport, which hands the
//! decision back to the bridge's reconnection logic.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use reqwest_eventsource::{Event as StreamEvent, EventSource};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SseClientConfig;
use crate::core::errors::BridgeError;
use crate::core::events::InboundEvent;
use crate::transport::Transport;

pub struct SseClientTransport {
    client: reqwest::Client,
    message_url: Arc<RwLock<Url>>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<InboundEvent>>,
    closed: CancellationToken,
}

impl SseClientTransport {
    /// Connects to the remote event stream. Creation succeeds only once
    /// the stream has actually opened.
    pub async fn connect(config: &SseClientConfig) -> Result<Self, BridgeError> {
        let base = Url::parse(&config.server_url).map_err(|e| {
            BridgeError::InvalidConfig(format!("sse client: invalid serverUrl: {e}"))
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                BridgeError::InvalidConfig(format!("sse client: invalid header name '{name}': {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                BridgeError::InvalidConfig(format!("sse client: invalid header value: {e}"))
            })?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| {
                BridgeError::TransportCreateFailed(format!("failed to build HTTP client: {e}"))
            })?;

        let message_url = Arc::new(RwLock::new(default_messages_url(&base)?));

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let closed = CancellationToken::new();

        let source = EventSource::new(client.get(base.clone())).map_err(|e| {
            BridgeError::TransportCreateFailed(format!("failed to open event stream: {e}"))
        })?;

        tokio::spawn(event_loop(
            source,
            base,
            message_url.clone(),
            inbound_tx,
            ready_tx,
            closed.clone(),
        ));

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(BridgeError::TransportCreateFailed(
                    "event stream ended before opening".to_string(),
                ))
            }
        }

        info!(url = %config.server_url, "SSE client connected");

        Ok(Self {
            client,
            message_url,
            inbound_rx: Mutex::new(inbound_rx),
            closed,
        })
    }
}

/// Conventional default: the messages endpoint next to the event stream.
/// The server's `endpoint` event replaces this as soon as it arrives.
fn default_messages_url(base: &Url) -> Result<Url, BridgeError> {
    let trimmed = base
        .as_str()
        .trim_end_matches('/')
        .trim_end_matches("/sse")
        .to_string();
    Url::parse(&format!("{trimmed}/messages")).map_err(|e| {
        BridgeError::InvalidConfig(format!("sse client: cannot derive messages URL: {e}"))
    })
}

async fn event_loop(
    mut source: EventSource,
    base: Url,
    message_url: Arc<RwLock<Url>>,
    tx: mpsc::UnboundedSender<InboundEvent>,
    ready_tx: oneshot::Sender<Result<(), BridgeError>>,
    closed: CancellationToken,
) {
    let mut ready_tx = Some(ready_tx);
    loop {
        let event = tokio::select! {
            _ = closed.cancelled() => break,
            event = source.next() => event,
        };
        match event {
            Some(Ok(StreamEvent::Open)) => {
                debug!("SSE stream opened");
                if let Some(ready) = ready_tx.take() {
                    let _ = ready.send(Ok(()));
                }
            }
            Some(Ok(StreamEvent::Message(message))) => {
                if message.event == "endpoint" {
                    match base.join(&message.data) {
                        Ok(url) => {
                            debug!(%url, "messages endpoint advertised");
                            *message_url.write().await = url;
                        }
                        Err(e) => warn!("invalid endpoint event '{}': {e}", message.data),
                    }
                } else if tx.send(InboundEvent::Message(message.data)).is_err() {
                    break;
                }
            }
            Some(Err(e)) => {
                if let Some(ready) = ready_tx.take() {
                    let _ = ready.send(Err(BridgeError::TransportCreateFailed(e.to_string())));
                    break;
                }
                warn!("SSE stream error: {e}");
                let _ = tx.send(InboundEvent::Error(BridgeError::TransportIo(e.to_string())));
                break;
            }
            None => break,
        }
    }
    source.close();
    closed.cancel();
}

#[async_trait]
impl Transport for SseClientTransport {
    async fn recv(&self) -> Option<InboundEvent> {
        self.inbound_rx.lock().await.recv().await
    }

    async fn send(&self, message: &str) -> Result<(), BridgeError> {
        if self.closed.is_cancelled() {
            return Err(BridgeError::TransportClosed);
        }
        let url = self.message_url.read().await.clone();
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(message.to_string())
            .send()
            .await
            .map_err(|e| BridgeError::TransportIo(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BridgeError::TransportIo(format!(
                "messages endpoint returned {}",
                response.status()
            )));
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_messages_url() {
        let base = Url::parse("http://localhost:8080/sse").unwrap();
        assert_eq!(
            default_messages_url(&base).unwrap().as_str(),
            "http://localhost:8080/messages"
        );

        let bare = Url::parse("http://localhost:8080").unwrap();
        assert_eq!(
            default_messages_url(&bare).unwrap().as_str(),
            "http://localhost:8080/messages"
        );
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let config = SseClientConfig::new("not a url");
        assert!(matches!(
            SseClientTransport::connect(&config).await,
            Err(BridgeError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_header() {
        let mut config = SseClientConfig::new("http://localhost:1/sse");
        config
            .headers
            .insert("bad header name".to_string(), "x".to_string());
        assert!(matches!(
            SseClientTransport::connect(&config).await,
            Err(BridgeError::InvalidConfig(_))
        ));
    }
}
