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

//! Server-side transport bound to the current process's standard streams.
//!
//! Frames arrive newline-delimited on stdin and leave on stdout; logging
//! must therefore go to stderr. EOF on stdin means the connected peer is
//! gone and closes the transport.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::core::errors::BridgeError;
use crate::core::events::InboundEvent;
use crate::transport::{spawn_frame_reader, spawn_frame_writer, Transport};

pub struct StdioServerTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<InboundEvent>>,
    closed: CancellationToken,
}

impl StdioServerTransport {
    pub fn new() -> Self {
        let closed = CancellationToken::new();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        spawn_frame_reader(tokio::io::stdin(), inbound_tx, closed.clone());
        spawn_frame_writer(tokio::io::stdout(), outbound_rx, closed.clone());

        Self {
            outbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            closed,
        }
    }
}

impl Default for StdioServerTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioServerTransport {
    async fn recv(&self) -> Option<InboundEvent> {
        self.inbound_rx.lock().await.recv().await
    }

    async fn send(&self, message: &str) -> Result<(), BridgeError> {
        if self.closed.is_cancelled() {
            return Err(BridgeError::TransportClosed);
        }
        self.outbound_tx
            .send(message.to_string())
            .map_err(|_| BridgeError::TransportClosed)
    }

    async fn close(&self) {
        self.closed.cancel();
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}
