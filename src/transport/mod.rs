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

//! The abstract transport contract and the built-in transports.
//!
//! A transport is a bidirectional channel of JSON-RPC frames. The bridge
//! consumes transports exclusively through the [`Transport`] trait and
//! never inspects frame content.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::errors::BridgeError;
use crate::core::events::InboundEvent;

pub mod factory;
pub mod sse_client;
pub mod sse_server;
pub mod stdio_client;
pub mod stdio_server;

/// Maximum allowed JSON-RPC frame size (10 MB).
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// A bidirectional message channel carrying JSON-RPC frames.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Pull the next inbound event. Resolves to `None` once the transport
    /// has closed and the stream is drained. The bridge attaches exactly
    /// one consumer at a time.
    async fn recv(&self) -> Option<InboundEvent>;

    /// Enqueue an outbound frame. Fails with [`BridgeError::TransportClosed`]
    /// once the transport is closed; other failures are kind-specific.
    async fn send(&self, message: &str) -> Result<(), BridgeError>;

    /// Close the transport and release its resources. Idempotent.
    async fn close(&self);

    /// Token cancelled exactly once when the transport enters the closed
    /// state, whether by local `close` or remote disconnection.
    fn closed(&self) -> CancellationToken;
}

/// Spawns a background task reading newline-delimited frames from
/// `stream` into the inbound channel. Cancels `closed` on EOF so the
/// bridge observes the disconnect.
pub(crate) fn spawn_frame_reader<R>(
    stream: R,
    tx: mpsc::UnboundedSender<InboundEvent>,
    closed: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut framed = FramedRead::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
        loop {
            tokio::select! {
                _ = closed.cancelled() => break,
                frame = framed.next() => match frame {
                    Some(Ok(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        if tx.send(InboundEvent::Message(line)).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("frame decode error: {e}");
                        let _ = tx.send(InboundEvent::Error(BridgeError::TransportIo(
                            e.to_string(),
                        )));
                    }
                    None => break, // EOF
                }
            }
        }
        closed.cancel();
    });
}

/// Spawns a background task writing queued frames to `sink`, one per
/// line. A write failure closes the transport.
pub(crate) fn spawn_frame_writer<W>(
    mut sink: W,
    mut rx: mpsc::UnboundedReceiver<String>,
    closed: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                _ = closed.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                }
            };
            if let Err(e) = write_frame(&mut sink, &message).await {
                warn!("frame write error: {e}");
                break;
            }
        }
        closed.cancel();
    });
}

async fn write_frame<W>(sink: &mut W, message: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    sink.write_all(message.as_bytes()).await?;
    sink.write_all(b"\n").await?;
    sink.flush().await
}
