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

//! Lifecycle rules: what happens when a transport closes.
//!
//! The server side follows the configured shutdown policy; the client
//! side follows the auto-reconnect tuning. Both reconnect paths are
//! iterative loops that observe `shutdown()` before and after every
//! sleep.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::bridge::{pump, BridgeInner};
use crate::config::ShutdownPolicy;
use crate::core::errors::BridgeError;
use crate::core::events::TransportSource;

impl BridgeInner {
    /// Invoked by the close watcher when the server transport closes
    /// while the bridge is running.
    pub(crate) async fn handle_server_closed(self: Arc<Self>, generation: u64) {
        if self.flags.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut st = self.state.lock().await;
            if st.generation != generation || !self.flags.initialized.load(Ordering::SeqCst) {
                return; // stale event from a replaced pair
            }
            // The transport closed on its own; only the handle remains.
            st.server = None;
            self.flags.server_active.store(false, Ordering::SeqCst);
        }

        info!("server transport closed");
        self.emit_transport_closed(TransportSource::Server);

        match self.config.server_shutdown_policy() {
            ShutdownPolicy::ShutdownBridge => {
                info!("server shutdown policy is shutdownBridge, shutting down");
                self.shutdown().await;
            }
            ShutdownPolicy::WaitForReconnection => {
                self.wait_for_server_reconnection().await;
            }
        }
    }

    /// Invoked by the close watcher when the client transport closes
    /// while the bridge is running.
    pub(crate) async fn handle_client_closed(self: Arc<Self>, generation: u64) {
        if self.flags.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let reconnect = {
            let mut st = self.state.lock().await;
            if st.generation != generation || !self.flags.initialized.load(Ordering::SeqCst) {
                return;
            }
            st.client = None;
            self.client_auto_reconnect() && self.flags.server_active.load(Ordering::SeqCst)
        };

        info!("client transport closed");
        self.emit_transport_closed(TransportSource::Client);

        if reconnect {
            tokio::spawn(self.clone().client_reconnect_loop());
        } else {
            debug!("client auto-reconnect disabled or server inactive, not reconnecting");
        }
    }

    /// Iterative client reconnection with a flat delay between attempts.
    pub(crate) async fn client_reconnect_loop(self: Arc<Self>) {
        loop {
            if self.flags.shutting_down.load(Ordering::SeqCst)
                || !self.flags.server_active.load(Ordering::SeqCst)
            {
                return;
            }

            let max_attempts = self.tuning.client_max_attempts.load(Ordering::SeqCst);
            let delay =
                Duration::from_millis(self.tuning.client_delay_ms.load(Ordering::SeqCst));
            let attempt = self
                .counters
                .client_reconnect_attempts
                .fetch_add(1, Ordering::SeqCst)
                + 1;
            if attempt > max_attempts {
                error!(
                    max_attempts,
                    "client reconnection attempts exhausted, giving up"
                );
                return;
            }

            info!(attempt, max_attempts, "attempting client reconnection");
            tokio::time::sleep(delay).await;

            // The server may have dropped while we slept.
            if self.flags.shutting_down.load(Ordering::SeqCst)
                || !self.flags.server_active.load(Ordering::SeqCst)
            {
                debug!("server no longer active, abandoning client reconnection");
                return;
            }

            match self
                .factory
                .create_client(
                    self.config.client_transport_kind(),
                    self.config.client_transport_config(),
                )
                .await
            {
                Ok(client) => {
                    let installed = {
                        let mut st = self.state.lock().await;
                        if self.flags.shutting_down.load(Ordering::SeqCst)
                            || !self.flags.server_active.load(Ordering::SeqCst)
                        {
                            false
                        } else if let Some(server) = st.server.clone() {
                            if let Some(subscriptions) = st.subscriptions.take() {
                                subscriptions.cancel();
                            }
                            st.generation += 1;
                            st.client = Some(client.clone());
                            st.subscriptions = Some(pump::install(
                                &self,
                                st.generation,
                                server,
                                client.clone(),
                            ));
                            true
                        } else {
                            false
                        }
                    };

                    if installed {
                        self.counters
                            .client_reconnect_attempts
                            .store(0, Ordering::SeqCst);
                        info!("client transport reconnected");
                        self.emit_transport_reconnected(TransportSource::Client);
                    } else {
                        // Lost the race against a shutdown or server drop.
                        client.close().await;
                    }
                    return;
                }
                Err(e) => {
                    self.emit_transport_error(TransportSource::Client, &e);
                    // iterate; the delay is flat, with no backoff growth
                }
            }
        }
    }

    /// Holds the bridge while a replacement server transport is awaited.
    /// Entered only under the `waitForReconnection` policy.
    pub(crate) async fn wait_for_server_reconnection(self: Arc<Self>) {
        if self.flags.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        if self
            .flags
            .waiting_for_server_reconnection
            .swap(true, Ordering::SeqCst)
        {
            return; // already waiting
        }
        self.counters
            .server_reconnect_attempts
            .store(0, Ordering::SeqCst);

        warn!("waiting for server reconnection");

        // The client cannot function with no server; drop it for the
        // duration together with the old subscription set.
        let client = {
            let mut st = self.state.lock().await;
            if let Some(subscriptions) = st.subscriptions.take() {
                subscriptions.cancel();
            }
            st.generation += 1;
            st.client.take()
        };
        if let Some(client) = client {
            client.close().await;
        }

        loop {
            if self.flags.shutting_down.load(Ordering::SeqCst)
                || !self
                    .flags
                    .waiting_for_server_reconnection
                    .load(Ordering::SeqCst)
            {
                return;
            }

            let max_attempts = self.tuning.server_max_attempts.load(Ordering::SeqCst);
            let attempt = self
                .counters
                .server_reconnect_attempts
                .fetch_add(1, Ordering::SeqCst)
                + 1;
            if max_attempts > 0 && attempt > max_attempts {
                let e = BridgeError::ReconnectExhausted(max_attempts);
                error!("server reconnection failed: {e}");
                self.emit_transport_error(TransportSource::Server, &e);
                self.flags
                    .waiting_for_server_reconnection
                    .store(false, Ordering::SeqCst);
                self.shutdown().await;
                return;
            }

            if let Some(hook) = self.server_reconnect_hook() {
                let allow = match hook().await {
                    Ok(allow) => allow,
                    Err(e) => {
                        error!("server reconnect hook failed: {e:#}");
                        false
                    }
                };
                if !allow {
                    info!("server reconnection vetoed by application hook");
                    self.flags
                        .waiting_for_server_reconnection
                        .store(false, Ordering::SeqCst);
                    self.shutdown().await;
                    return;
                }
            }

            debug!(attempt, "attempting server reconnection");
            match self.try_reconnect_server().await {
                Ok(true) => {
                    self.counters
                        .server_reconnect_attempts
                        .store(0, Ordering::SeqCst);
                    self.flags
                        .waiting_for_server_reconnection
                        .store(false, Ordering::SeqCst);
                    info!("server transport reconnected");
                    self.emit_transport_reconnected(TransportSource::Server);
                    return;
                }
                Ok(false) => return, // a shutdown won the race
                Err((source, e)) => {
                    self.emit_transport_error(source, &e);
                }
            }

            if self.flags.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            let interval =
                Duration::from_millis(self.tuning.server_interval_ms.load(Ordering::SeqCst));
            tokio::time::sleep(interval).await;
        }
    }

    /// Creates the (new server, new client) pair atomically: if the
    /// client cannot be re-created, the fresh server is closed again so
    /// the bridge never runs server-active with no client. Returns
    /// `Ok(false)` when a concurrent shutdown invalidated the attempt.
    async fn try_reconnect_server(
        self: &Arc<Self>,
    ) -> Result<bool, (TransportSource, BridgeError)> {
        let server = self
            .factory
            .create_server(
                self.config.server_transport_kind(),
                self.config.server_transport_config(),
            )
            .await
            .map_err(|e| (TransportSource::Server, e))?;

        let client = match self
            .factory
            .create_client(
                self.config.client_transport_kind(),
                self.config.client_transport_config(),
            )
            .await
        {
            Ok(client) => client,
            Err(e) => {
                server.close().await;
                return Err((TransportSource::Client, e));
            }
        };

        {
            let mut st = self.state.lock().await;
            if !self.flags.shutting_down.load(Ordering::SeqCst)
                && self
                    .flags
                    .waiting_for_server_reconnection
                    .load(Ordering::SeqCst)
            {
                st.generation += 1;
                st.server = Some(server.clone());
                st.client = Some(client.clone());
                st.subscriptions =
                    Some(pump::install(self, st.generation, server, client));
                self.flags.server_active.store(true, Ordering::SeqCst);
                return Ok(true);
            }
        }

        // Shutdown raced us between creation and installation.
        server.close().await;
        client.close().await;
        Ok(false)
    }
}
