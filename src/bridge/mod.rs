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

//! The bridge engine: public surface, state, initialization and shutdown.
//!
//! A [`Bridge`] glues one server-side transport to one client-side
//! transport and forwards JSON-RPC frames between them full-duplex. It
//! owns both transports and the subscription set installed against them;
//! the lifecycle rules (shutdown policy, reconnection) live in the
//! `lifecycle` module.

mod lifecycle;
mod pump;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Map;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::config::{
    BridgeConfig, ShutdownPolicy, SseClientConfig, SseServerConfig, StdioClientConfig,
    TransportKind,
};
use crate::core::errors::BridgeError;
use crate::core::events::{
    ServerReconnectHook, TransportClosedHandler, TransportErrorHandler,
    TransportReconnectedHandler, TransportSource,
};
use crate::transport::factory::{DefaultTransportFactory, TransportFactory};
use crate::transport::Transport;

use pump::SubscriptionSet;

const DEFAULT_CLIENT_MAX_RECONNECT_ATTEMPTS: u32 = 3;
const DEFAULT_CLIENT_RECONNECT_DELAY_MS: u64 = 2_000;
/// 0 = unbounded.
const DEFAULT_SERVER_MAX_RECONNECT_ATTEMPTS: u32 = 0;
const DEFAULT_SERVER_RECONNECT_CHECK_INTERVAL_MS: u64 = 5_000;

/// Transports, subscriptions, and the generation counter guarding stale
/// close events. Mutated only behind the lifecycle lock.
pub(crate) struct LifecycleState {
    pub(crate) server: Option<Arc<dyn Transport>>,
    pub(crate) client: Option<Arc<dyn Transport>>,
    pub(crate) subscriptions: Option<SubscriptionSet>,
    pub(crate) generation: u64,
}

pub(crate) struct Flags {
    pub(crate) initialized: AtomicBool,
    pub(crate) shutting_down: AtomicBool,
    pub(crate) server_active: AtomicBool,
    pub(crate) waiting_for_server_reconnection: AtomicBool,
}

pub(crate) struct ReconnectTuning {
    pub(crate) client_auto_reconnect: AtomicBool,
    pub(crate) client_max_attempts: AtomicU32,
    pub(crate) client_delay_ms: AtomicU64,
    pub(crate) server_max_attempts: AtomicU32,
    pub(crate) server_interval_ms: AtomicU64,
}

pub(crate) struct Counters {
    pub(crate) client_reconnect_attempts: AtomicU32,
    pub(crate) server_reconnect_attempts: AtomicU32,
}

/// Assignable callback slots. Read at call site, so reassignment takes
/// effect for the next event.
struct Callbacks {
    error: StdMutex<Option<TransportErrorHandler>>,
    closed: StdMutex<Option<TransportClosedHandler>>,
    reconnected: StdMutex<Option<TransportReconnectedHandler>>,
    server_reconnect: StdMutex<Option<ServerReconnectHook>>,
    /// Held while a callback runs so callbacks fire one at a time.
    gate: StdMutex<()>,
}

pub(crate) struct BridgeInner {
    pub(crate) config: BridgeConfig,
    pub(crate) factory: Arc<dyn TransportFactory>,
    pub(crate) state: Mutex<LifecycleState>,
    pub(crate) flags: Flags,
    pub(crate) tuning: ReconnectTuning,
    pub(crate) counters: Counters,
    callbacks: Callbacks,
    idle_notify: Notify,
}

/// A transport bridge between one MCP server-side and one MCP
/// client-side transport.
///
/// Cheap to clone; all clones share the same underlying bridge.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_factory(config, Arc::new(DefaultTransportFactory))
    }

    /// Builds a bridge over a custom transport factory. This is the seam
    /// tests use to install mock transports.
    pub fn with_factory(config: BridgeConfig, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                config,
                factory,
                state: Mutex::new(LifecycleState {
                    server: None,
                    client: None,
                    subscriptions: None,
                    generation: 0,
                }),
                flags: Flags {
                    initialized: AtomicBool::new(false),
                    shutting_down: AtomicBool::new(false),
                    server_active: AtomicBool::new(false),
                    waiting_for_server_reconnection: AtomicBool::new(false),
                },
                tuning: ReconnectTuning {
                    client_auto_reconnect: AtomicBool::new(true),
                    client_max_attempts: AtomicU32::new(DEFAULT_CLIENT_MAX_RECONNECT_ATTEMPTS),
                    client_delay_ms: AtomicU64::new(DEFAULT_CLIENT_RECONNECT_DELAY_MS),
                    server_max_attempts: AtomicU32::new(DEFAULT_SERVER_MAX_RECONNECT_ATTEMPTS),
                    server_interval_ms: AtomicU64::new(
                        DEFAULT_SERVER_RECONNECT_CHECK_INTERVAL_MS,
                    ),
                },
                counters: Counters {
                    client_reconnect_attempts: AtomicU32::new(0),
                    server_reconnect_attempts: AtomicU32::new(0),
                },
                callbacks: Callbacks {
                    error: StdMutex::new(None),
                    closed: StdMutex::new(None),
                    reconnected: StdMutex::new(None),
                    server_reconnect: StdMutex::new(None),
                    gate: StdMutex::new(()),
                },
                idle_notify: Notify::new(),
            }),
        }
    }

    /// Bridge a stdio MCP server (this process's stdin/stdout) to a
    /// remote SSE MCP server. The effective shutdown policy is always
    /// `ShutdownBridge` for a stdio server.
    pub fn stdio_server_to_sse_client(
        client: SseClientConfig,
        policy: Option<ShutdownPolicy>,
    ) -> Self {
        let config = BridgeConfig::new(
            TransportKind::Stdio,
            TransportKind::Sse,
            Map::new(),
            client.to_map(),
            policy.unwrap_or_default(),
        );
        Self::new(config)
    }

    /// Expose a local child-process MCP server over SSE.
    pub fn sse_server_to_stdio_client(
        server: SseServerConfig,
        client: StdioClientConfig,
        policy: Option<ShutdownPolicy>,
    ) -> Self {
        let config = BridgeConfig::new(
            TransportKind::Sse,
            TransportKind::Stdio,
            server.to_map(),
            client.to_map(),
            policy.unwrap_or_default(),
        );
        Self::new(config)
    }

    /// Creates both transports (client first) and starts forwarding.
    ///
    /// A no-op on an already-initialized bridge. On failure the partially
    /// built state is torn down before the error is returned.
    pub async fn initialize(&self) -> Result<(), BridgeError> {
        self.inner.initialize().await
    }

    /// Tears the bridge down and returns it to the un-initialized state.
    /// Idempotent; safe to call from any state.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }

    /// Resolves once the bridge is no longer initialized, whether through
    /// [`Bridge::shutdown`] or the configured shutdown policy.
    pub async fn wait_until_idle(&self) {
        loop {
            let mut notified = std::pin::pin!(self.inner.idle_notify.notified());
            // Register for wakeups before checking the flag, or a
            // teardown between the check and the await would be missed.
            notified.as_mut().enable();
            if !self.is_initialized() {
                return;
            }
            notified.await;
        }
    }

    pub fn set_auto_reconnect(&self, enabled: bool, max_attempts: u32, delay: Duration) {
        let tuning = &self.inner.tuning;
        tuning.client_auto_reconnect.store(enabled, Ordering::SeqCst);
        tuning.client_max_attempts.store(max_attempts, Ordering::SeqCst);
        tuning
            .client_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// `max_attempts` of 0 means unbounded.
    pub fn set_server_reconnection_options(&self, max_attempts: u32, check_interval: Duration) {
        let tuning = &self.inner.tuning;
        tuning.server_max_attempts.store(max_attempts, Ordering::SeqCst);
        tuning
            .server_interval_ms
            .store(check_interval.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn on_transport_error(
        &self,
        handler: impl Fn(TransportSource, &BridgeError) + Send + Sync + 'static,
    ) {
        *lock(&self.inner.callbacks.error) = Some(Arc::new(handler));
    }

    pub fn on_transport_closed(&self, handler: impl Fn(TransportSource) + Send + Sync + 'static) {
        *lock(&self.inner.callbacks.closed) = Some(Arc::new(handler));
    }

    pub fn on_transport_reconnected(
        &self,
        handler: impl Fn(TransportSource) + Send + Sync + 'static,
    ) {
        *lock(&self.inner.callbacks.reconnected) = Some(Arc::new(handler));
    }

    /// Installs the hook consulted before each server reconnection
    /// attempt. Returning `Ok(false)` or `Err` abandons reconnection and
    /// shuts the bridge down.
    pub fn on_server_reconnect_requested<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        *lock(&self.inner.callbacks.server_reconnect) = Some(Arc::new(
            move || -> BoxFuture<'static, anyhow::Result<bool>> { Box::pin(hook()) },
        ));
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.flags.initialized.load(Ordering::SeqCst)
    }

    pub fn server_active(&self) -> bool {
        self.inner.flags.server_active.load(Ordering::SeqCst)
    }

    pub fn waiting_for_server_reconnection(&self) -> bool {
        self.inner
            .flags
            .waiting_for_server_reconnection
            .load(Ordering::SeqCst)
    }

    pub fn server_transport_kind(&self) -> TransportKind {
        self.inner.config.server_transport_kind()
    }

    pub fn client_transport_kind(&self) -> TransportKind {
        self.inner.config.client_transport_kind()
    }

    /// The effective server-shutdown policy.
    pub fn server_shutdown_policy(&self) -> ShutdownPolicy {
        self.inner.config.server_shutdown_policy()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }
}

fn lock<'a, T>(mutex: &'a StdMutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BridgeInner {
    async fn initialize(self: &Arc<Self>) -> Result<(), BridgeError> {
        let mut st = self.state.lock().await;
        if self.flags.initialized.load(Ordering::SeqCst) {
            warn!("bridge already initialized, ignoring initialize()");
            return Ok(());
        }

        info!(
            server = %self.config.server_transport_kind(),
            client = %self.config.client_transport_kind(),
            policy = %self.config.server_shutdown_policy(),
            "initializing bridge"
        );

        // The client side comes up first; the server transport must not
        // accept traffic before there is somewhere to forward it.
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
                self.teardown(&mut st).await;
                drop(st);
                self.emit_transport_error(TransportSource::Client, &e);
                return Err(e);
            }
        };
        st.client = Some(client.clone());

        let server = match self
            .factory
            .create_server(
                self.config.server_transport_kind(),
                self.config.server_transport_config(),
            )
            .await
        {
            Ok(server) => server,
            Err(e) => {
                self.teardown(&mut st).await;
                drop(st);
                self.emit_transport_error(TransportSource::Server, &e);
                return Err(e);
            }
        };
        st.server = Some(server.clone());

        st.generation += 1;
        st.subscriptions = Some(pump::install(self, st.generation, server, client));

        self.flags.server_active.store(true, Ordering::SeqCst);
        self.flags.initialized.store(true, Ordering::SeqCst);
        info!("bridge running");
        Ok(())
    }

    pub(crate) async fn shutdown(&self) {
        if self.flags.shutting_down.swap(true, Ordering::SeqCst) {
            return; // already in progress
        }
        debug!("shutting down bridge");
        let mut st = self.state.lock().await;
        self.teardown(&mut st).await;
        self.flags.shutting_down.store(false, Ordering::SeqCst);
        info!("bridge shut down");
    }

    /// Cancels the subscription set, closes both transports, and resets
    /// all counters and flags. Requires the lifecycle lock.
    pub(crate) async fn teardown(&self, st: &mut LifecycleState) {
        if let Some(subscriptions) = st.subscriptions.take() {
            subscriptions.cancel();
        }
        // Invalidate close events still in flight from the old pair.
        st.generation += 1;

        if let Some(server) = st.server.take() {
            server.close().await;
        }
        self.flags.server_active.store(false, Ordering::SeqCst);

        if let Some(client) = st.client.take() {
            client.close().await;
        }

        self.counters
            .client_reconnect_attempts
            .store(0, Ordering::SeqCst);
        self.counters
            .server_reconnect_attempts
            .store(0, Ordering::SeqCst);
        self.flags
            .waiting_for_server_reconnection
            .store(false, Ordering::SeqCst);
        self.flags.initialized.store(false, Ordering::SeqCst);
        self.idle_notify.notify_waiters();
    }

    pub(crate) fn client_auto_reconnect(&self) -> bool {
        self.tuning.client_auto_reconnect.load(Ordering::SeqCst)
    }

    pub(crate) fn server_reconnect_hook(&self) -> Option<ServerReconnectHook> {
        lock(&self.callbacks.server_reconnect).clone()
    }

    pub(crate) fn emit_transport_error(&self, source: TransportSource, error: &BridgeError) {
        warn!(%source, %error, "transport error");
        let handler = lock(&self.callbacks.error).clone();
        if let Some(handler) = handler {
            let _gate = lock(&self.callbacks.gate);
            handler(source, error);
        }
    }

    pub(crate) fn emit_transport_closed(&self, source: TransportSource) {
        let handler = lock(&self.callbacks.closed).clone();
        if let Some(handler) = handler {
            let _gate = lock(&self.callbacks.gate);
            handler(source);
        }
    }

    pub(crate) fn emit_transport_reconnected(&self, source: TransportSource) {
        let handler = lock(&self.callbacks.reconnected).clone();
        if let Some(handler) = handler {
            let _gate = lock(&self.callbacks.gate);
            handler(source);
        }
    }
}
