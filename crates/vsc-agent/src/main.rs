//! vscan: one-shot OBD-II scan of a vehicle through a BLE ELM327 adapter.
//!
//! Usage: `vscan [config.toml] [device-id]`. The report goes to stdout,
//! logs go to stderr as JSON.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use vsc_agent::config::AgentConfig;
use vsc_agent::runner::{self, ScanRunner};
use vsc_link::BtleLink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "vscan starting");

    // ── Load config ─────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/vscan/agent.toml".to_string());

    let mut config = AgentConfig::from_file(&config_path)?;
    if let Some(device) = std::env::args().nth(2) {
        config.device_id = device;
    }
    tracing::info!(device_id = %config.device_id, "config loaded");

    // ── Session + scan ──────────────────────────────────────────
    let link = Arc::new(BtleLink::new(config.session.discovery_timeout()));
    let runner = ScanRunner::new(link, &config);

    let cancel = runner.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("cancel requested, finishing current read");
            cancel.cancel();
        }
    });

    match runner.run().await {
        Ok(result) => {
            println!("{}", runner::render(&result, config.report)?);
            tracing::info!(scan_id = %result.scan_id, "vscan finished");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "scan did not complete");
            if let Some(partial) = e.partial() {
                println!("{}", runner::render(partial, config.report)?);
            }
            eprintln!("{}", e.user_message());
            Err(e.into())
        }
    }
}
