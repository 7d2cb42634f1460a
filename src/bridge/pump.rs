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

//! The message pump: forwarders and close watchers installed against the
//! current transport pair.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::bridge::BridgeInner;
use crate::core::events::{InboundEvent, TransportSource};
use crate::transport::Transport;

/// The group of forwarders and close watchers tied to one transport
/// pair. Cancelled as a unit whenever the pair is replaced or torn down.
pub(crate) struct SubscriptionSet {
    token: CancellationToken,
}

impl SubscriptionSet {
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Installs both forwarders and both close watchers against the given
/// pair. `generation` tags the watchers so events from a replaced pair
/// are ignored.
pub(crate) fn install(
    inner: &Arc<BridgeInner>,
    generation: u64,
    server: Arc<dyn Transport>,
    client: Arc<dyn Transport>,
) -> SubscriptionSet {
    let token = CancellationToken::new();

    spawn_forwarder(
        inner.clone(),
        token.clone(),
        TransportSource::Server,
        server.clone(),
        client.clone(),
    );
    spawn_forwarder(
        inner.clone(),
        token.clone(),
        TransportSource::Client,
        client.clone(),
        server.clone(),
    );
    spawn_close_watcher(
        inner.clone(),
        token.clone(),
        TransportSource::Server,
        server.closed(),
        generation,
    );
    spawn_close_watcher(
        inner.clone(),
        token.clone(),
        TransportSource::Client,
        client.closed(),
        generation,
    );

    SubscriptionSet { token }
}

fn spawn_forwarder(
    inner: Arc<BridgeInner>,
    token: CancellationToken,
    source_side: TransportSource,
    source: Arc<dyn Transport>,
    sink: Arc<dyn Transport>,
) {
    let sink_side = source_side.opposite();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event = source.recv() => event,
            };
            match event {
                Some(InboundEvent::Message(message)) => {
                    trace!(%source_side, len = message.len(), "forwarding frame");
                    if let Err(e) = sink.send(&message).await {
                        // Payloads are opaque, so a retry cannot be known
                        // to be safe; the frame is dropped.
                        debug!(%sink_side, "send failed, dropping frame");
                        inner.emit_transport_error(sink_side, &e);
                    }
                }
                Some(InboundEvent::Error(e)) => {
                    inner.emit_transport_error(source_side, &e);
                }
                None => break, // source closed; its watcher drives the lifecycle
            }
        }
    });
}

fn spawn_close_watcher(
    inner: Arc<BridgeInner>,
    token: CancellationToken,
    side: TransportSource,
    closed: CancellationToken,
    generation: u64,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = closed.cancelled() => {
                debug!(%side, generation, "transport close observed");
                match side {
                    TransportSource::Server => inner.handle_server_closed(generation).await,
                    TransportSource::Client => inner.handle_client_closed(generation).await,
                }
            }
        }
    });
}
