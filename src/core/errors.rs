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

//! Error types for the bridge and its transports.

use thiserror::Error;

/// Main error type for the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A required configuration key is missing or malformed
    #[error("Invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// Unknown transport kind requested
    #[error("Unsupported transport type: {0}")]
    UnsupportedTransport(String),

    /// Underlying transport could not be constructed
    #[error("Failed to create transport: {0}")]
    TransportCreateFailed(String),

    /// Error observed on an inbound stream or during a send
    #[error("Transport I/O error: {0}")]
    TransportIo(String),

    /// Send invoked after the transport closed
    #[error("Transport is closed")]
    TransportClosed,

    /// Bounded reconnect attempts hit the ceiling
    #[error("Reconnection attempts exhausted after {0} attempts")]
    ReconnectExhausted(u32),
}
