//! One scan run: connect, scan, disconnect, render.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};
use vsc_elm327::{AdapterController, CancelFlag, ScanError, ScanOrchestrator};
use vsc_link::{BleLink, TransportError, TransportSession};
use vsc_protocol::{ScanProgress, ScanResult};

use crate::config::{AgentConfig, ReportFormat};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("could not connect to {device}: {source}")]
    Connect {
        device: String,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Scan(#[from] ScanError),
}

impl RunError {
    /// Whatever the scan collected before it stopped.
    pub fn partial(&self) -> Option<&ScanResult> {
        match self {
            RunError::Connect { .. } => None,
            RunError::Scan(e) => Some(e.partial()),
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            RunError::Connect { .. } => {
                "Could not connect to the adapter. Check that it is powered and in range."
            }
            RunError::Scan(e) => e.user_message(),
        }
    }
}

/// Owns the session and orchestrator for one device.
pub struct ScanRunner {
    device_id: String,
    session: TransportSession,
    orchestrator: ScanOrchestrator,
}

impl ScanRunner {
    pub fn new(link: Arc<dyn BleLink>, config: &AgentConfig) -> Self {
        let session = TransportSession::new(link, config.session.clone());
        let adapter = Arc::new(AdapterController::new(Arc::new(session.clone())));
        Self {
            device_id: config.device_id.clone(),
            session,
            orchestrator: ScanOrchestrator::new(adapter, config.scan.clone()),
        }
    }

    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<ScanProgress>) -> Self {
        self.orchestrator = self.orchestrator.with_progress(tx);
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.orchestrator.cancel_flag()
    }

    pub fn session(&self) -> &TransportSession {
        &self.session
    }

    /// Connect, scan, and always disconnect afterwards.
    pub async fn run(&self) -> Result<ScanResult, RunError> {
        self.session
            .connect(&self.device_id)
            .await
            .map_err(|source| RunError::Connect {
                device: self.device_id.clone(),
                source,
            })?;
        info!(device = %self.device_id, "connected");

        let outcome = self.orchestrator.run(&self.device_id).await;

        if let Err(e) = self.session.disconnect().await {
            warn!(error = %e, "disconnect failed");
        }
        Ok(outcome?)
    }
}

/// Render a result for stdout.
pub fn render(result: &ScanResult, format: ReportFormat) -> anyhow::Result<String> {
    Ok(match format {
        ReportFormat::Json => serde_json::to_string_pretty(result)?,
        ReportFormat::Summary => result.summary(),
    })
}

#[cfg(test)]
mod tests {
    use vsc_elm327::codec;
    use vsc_link::{ConnectionState, MockLink};
    use vsc_protocol::ScanStage;

    use super::*;

    fn config() -> AgentConfig {
        toml::from_str(r#"device_id = "OBDII""#).unwrap()
    }

    /// Exact-match script for a healthy Ford on 11-bit CAN.
    fn scripted_link() -> Arc<MockLink> {
        let link = Arc::new(MockLink::new().with_fragment_size(7));
        link.set_response("ATZ", "\r\rELM327 v2.1\r\r>");
        for cmd in ["ATE0", "ATL0", "ATH1", "ATS1", "ATSTFF", "ATAT1", "ATSP0"] {
            link.set_response(cmd, "OK\r\r>");
        }
        link.set_response("ATDPN", "A6\r\r>");
        link.set_response("0100", "7E8 06 41 00 BE 3F A8 13\r\r>");
        link.set_response("0902", &codec::encode_vin("1FAHP0CD55L047824", Some("7E8")));
        link.set_response("03", "7E8 04 43 01 01 71\r\r>");
        link.set_response("07", "NO DATA\r\r>");
        link.set_response("0A", "NO DATA\r\r>");
        link.set_response("0101", "7E8 06 41 01 81 07 65 04\r\r>");
        link.set_response("0131", "7E8 04 41 31 00 64\r\r>");
        link.set_response("01A6", "7E8 06 41 A6 00 00 27 10\r\r>");
        link
    }

    #[tokio::test(start_paused = true)]
    async fn scan_over_fragmented_link() {
        let link = scripted_link();
        let runner = ScanRunner::new(link.clone(), &config());

        let result = runner.run().await.unwrap();

        assert_eq!(result.stage, ScanStage::Complete);
        assert_eq!(result.device_id, "OBDII");
        assert!(result.vin.valid);
        let stored = result.stored_dtcs.as_ref().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].code, "P0171");
        assert_eq!(result.distance_since_cleared_km, Some(100));
        // unscripted PIDs answer "?" and come back unavailable
        assert!(result.time_since_cleared_min.is_none());
        assert!((result.odometer.as_ref().unwrap().km - 1000.0).abs() < 1e-6);

        assert_eq!(runner.session().state(), ConnectionState::Disconnected);
        assert_eq!(link.overlapping_writes(), 0);
        assert_eq!(link.writes()[0], "ATZ");
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure() {
        let link = Arc::new(MockLink::new());
        link.fail_next_connects(1);
        let runner = ScanRunner::new(link, &config());

        let err = runner.run().await.unwrap_err();
        assert!(matches!(err, RunError::Connect { .. }));
        assert!(err.partial().is_none());
        assert!(err.to_string().contains("OBDII"));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_reset_fails_the_scan() {
        // nothing scripted: ATZ answers "?"
        let link = Arc::new(MockLink::new());
        let runner = ScanRunner::new(link, &config());

        let err = runner.run().await.unwrap_err();
        assert!(matches!(err, RunError::Scan(ScanError::AdapterInit { .. })));
        assert_eq!(err.partial().unwrap().stage, ScanStage::Failed);
        assert_eq!(runner.session().state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_reaches_subscriber() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = ScanRunner::new(scripted_link(), &config()).with_progress(tx);

        runner.run().await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.stage, ScanStage::Initializing);
        assert_eq!(first.fraction, 0.0);
    }

    #[test]
    fn render_formats() {
        let mut result = ScanResult::new("dev");
        result.finish(ScanStage::Complete);

        let json = render(&result, ReportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["device_id"], "dev");

        let summary = render(&result, ReportFormat::Summary).unwrap();
        assert!(summary.contains("VIN: N/A"));
    }
}
