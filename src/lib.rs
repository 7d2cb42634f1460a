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

//! mcp-bridge: a transport bridge for the Model Context Protocol.
//!
//! This library connects an MCP client and an MCP server that speak
//! different transports (line-delimited stdio vs. HTTP Server-Sent
//! Events), forwarding JSON-RPC frames in both directions while
//! coordinating connection lifecycle, reconnection, and shutdown. The
//! bridge is payload-opaque: frames are forwarded verbatim, never parsed.

pub mod bridge;
pub mod config;
pub mod core;
pub mod transport;

pub use crate::bridge::Bridge;
pub use crate::config::{
    BridgeConfig, ShutdownPolicy, SseClientConfig, SseServerConfig, StdioClientConfig,
    TransportKind,
};
pub use crate::core::errors::BridgeError;
pub use crate::core::events::{InboundEvent, TransportSource};
