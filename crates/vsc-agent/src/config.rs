//! Agent configuration, loadable from TOML.

use serde::Deserialize;
use vsc_elm327::ScanConfig;
use vsc_link::SessionConfig;

/// Top-level configuration for one scanner run.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// BLE device to scan: a peripheral id or advertised local name.
    pub device_id: String,
    /// Transport session settings (throttle, timeouts, reconnection).
    #[serde(default)]
    pub session: SessionConfig,
    /// Which optional reads the scan performs.
    #[serde(default)]
    pub scan: ScanConfig,
    /// How the finished report is printed.
    #[serde(default)]
    pub report: ReportFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    #[default]
    Json,
    /// Human-readable summary with "N/A" for unavailable fields.
    Summary,
}

impl AgentConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }
}
