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

//! Bridge events and application callback types.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::core::errors::BridgeError;

/// Which side of the bridge an event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportSource {
    Server,
    Client,
}

impl TransportSource {
    pub fn opposite(&self) -> Self {
        match self {
            TransportSource::Server => TransportSource::Client,
            TransportSource::Client => TransportSource::Server,
        }
    }
}

impl fmt::Display for TransportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportSource::Server => write!(f, "server"),
            TransportSource::Client => write!(f, "client"),
        }
    }
}

/// One event pulled from a transport's inbound stream.
#[derive(Debug)]
pub enum InboundEvent {
    /// A received JSON-RPC frame, passed through verbatim.
    Message(String),
    /// A stream-level error. Does not terminate the stream.
    Error(BridgeError),
}

/// Invoked when an error is observed on a transport's inbound stream or
/// during a send. The frame involved (if any) has been dropped.
pub type TransportErrorHandler = Arc<dyn Fn(TransportSource, &BridgeError) + Send + Sync>;

/// Invoked when a transport's close is observed while the bridge is running.
pub type TransportClosedHandler = Arc<dyn Fn(TransportSource) + Send + Sync>;

/// Invoked after a transport has been replaced by a fresh one.
pub type TransportReconnectedHandler = Arc<dyn Fn(TransportSource) + Send + Sync>;

/// Consulted before each server reconnection attempt. Return `Ok(false)`
/// to abandon reconnection and shut the bridge down; an `Err` is logged
/// and treated as a veto.
pub type ServerReconnectHook =
    Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>;
