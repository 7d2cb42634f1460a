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

//! Client-side transport that spawns an MCP server as a child process.
//!
//! Frames flow over the child's piped stdin/stdout; stderr is drained to
//! the log. The child's exit closes the transport, and closing the
//! transport kills the child.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StdioClientConfig;
use crate::core::errors::BridgeError;
use crate::core::events::InboundEvent;
use crate::transport::{spawn_frame_reader, spawn_frame_writer, Transport};

pub struct StdioClientTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<InboundEvent>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    closed: CancellationToken,
}

impl StdioClientTransport {
    pub fn spawn(config: &StdioClientConfig) -> Result<Self, BridgeError> {
        if config.command.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "stdio client: command must not be empty".to_string(),
            ));
        }

        debug!(command = %config.command, args = ?config.arguments, "spawning child process");

        let mut command = Command::new(&config.command);
        command
            .args(&config.arguments)
            .envs(&config.environment)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &config.working_directory {
            command.current_dir(dir);
        }

        // SAFETY: PR_SET_PDEATHSIG with SIGKILL is the standard Linux
        // mechanism to terminate the child when the bridge process dies.
        // The constants come from libc and are valid for this platform.
        #[cfg(target_os = "linux")]
        unsafe {
            command.pre_exec(|| {
                let ret = libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL);
                if ret != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = command.spawn().map_err(|e| {
            BridgeError::TransportCreateFailed(format!(
                "failed to spawn '{}': {e}",
                config.command
            ))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            BridgeError::TransportCreateFailed("child stdin not captured".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            BridgeError::TransportCreateFailed("child stdout not captured".to_string())
        })?;
        let stderr = child.stderr.take();

        let closed = CancellationToken::new();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();

        spawn_frame_reader(stdout, inbound_tx, closed.clone());
        spawn_frame_writer(stdin, outbound_rx, closed.clone());
        if let Some(stderr) = stderr {
            spawn_stderr_drain(stderr);
        }
        tokio::spawn(supervise(child, kill_rx, closed.clone()));

        Ok(Self {
            outbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            kill_tx: Mutex::new(Some(kill_tx)),
            closed,
        })
    }
}

/// Waits on the child and closes the transport when it exits. A kill
/// signal (or the transport being dropped) terminates the child instead.
async fn supervise(mut child: Child, kill_rx: oneshot::Receiver<()>, closed: CancellationToken) {
    tokio::select! {
        _ = kill_rx => {
            let _ = child.kill().await;
        }
        status = child.wait() => {
            match status {
                Ok(s) => info!(code = ?s.code(), "child process exited"),
                Err(e) => warn!("child wait failed: {e}"),
            }
        }
    }
    closed.cancel();
}

fn spawn_stderr_drain<R>(stream: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break, // pipe closed
                Ok(_) => {
                    let message = line.trim();
                    if !message.is_empty() {
                        debug!("[child stderr] {message}");
                    }
                }
                Err(_) => break,
            }
        }
    });
}

#[async_trait]
impl Transport for StdioClientTransport {
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
        if let Some(kill_tx) = self.kill_tx.lock().await.take() {
            let _ = kill_tx.send(());
        }
        self.closed.cancel();
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}
