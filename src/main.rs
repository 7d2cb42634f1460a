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

// Main entry point for the MCP transport bridge
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use mcp_bridge::{Bridge, BridgeConfig};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the bridge configuration JSON file
    #[arg(short, long)]
    config: PathBuf,

    /// Log level filter (e.g. "info" or "mcp_bridge=debug")
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format: "text" or "json"
    #[arg(long, default_value = "text")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    install_panic_hook();
    init_tracing(&cli);

    let raw = std::fs::read_to_string(&cli.config)?;
    let config: BridgeConfig = serde_json::from_str(&raw)?;

    info!(
        server = %config.server_transport_kind(),
        client = %config.client_transport_kind(),
        "starting bridge"
    );

    let bridge = Bridge::new(config);
    bridge.initialize().await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
        _ = bridge.wait_until_idle() => {
            info!("bridge stopped");
        }
    }

    bridge.shutdown().await;
    Ok(())
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("PANIC: {} at {}", message, location);
    }));
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Stdout may be carrying JSON-RPC frames; logs go to stderr.
    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if cli.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
