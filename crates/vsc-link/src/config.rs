use std::time::Duration;

use serde::Deserialize;

use crate::command::CommandClass;

/// Transport session settings, loadable from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Fixed delay applied before every command write.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    /// Per-command-class response timeouts.
    #[serde(default)]
    pub timeouts: CommandTimeouts,
    /// Delay between reconnection attempts after unexpected link loss.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Reconnection attempts before giving up (0 disables reconnection).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// How long the BLE link may scan for the device before failing.
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
}

/// Response timeouts by command class, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandTimeouts {
    /// `ATZ` / `ATWS`: the adapter reboots before answering.
    #[serde(default = "default_reset_ms")]
    pub reset_ms: u64,
    /// Other AT configuration commands (header, filter, echo, ...).
    #[serde(default = "default_short_ms")]
    pub short_ms: u64,
    /// Mode 01 PIDs and DTC reads.
    #[serde(default = "default_medium_ms")]
    pub medium_ms: u64,
    /// VIN, odometer, and UDS reads: the adapter may search the bus first.
    #[serde(default = "default_long_ms")]
    pub long_ms: u64,
}

fn default_throttle_ms() -> u64 {
    100
}

fn default_reconnect_delay_ms() -> u64 {
    2_000
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_discovery_timeout_ms() -> u64 {
    10_000
}

fn default_reset_ms() -> u64 {
    5_000
}

fn default_short_ms() -> u64 {
    2_000
}

fn default_medium_ms() -> u64 {
    10_000
}

fn default_long_ms() -> u64 {
    30_000
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self {
            reset_ms: default_reset_ms(),
            short_ms: default_short_ms(),
            medium_ms: default_medium_ms(),
            long_ms: default_long_ms(),
        }
    }
}

impl CommandTimeouts {
    pub fn for_class(&self, class: CommandClass) -> Duration {
        let ms = match class {
            CommandClass::Reset => self.reset_ms,
            CommandClass::AdapterConfig => self.short_ms,
            CommandClass::ObdData => self.medium_ms,
            CommandClass::BusSearch => self.long_ms,
        };
        Duration::from_millis(ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            throttle_ms: default_throttle_ms(),
            timeouts: CommandTimeouts::default(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
        }
    }
}

impl SessionConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    /// Timeout applied to `command`, chosen by its class.
    pub fn timeout_for(&self, command: &str) -> Duration {
        self.timeouts.for_class(CommandClass::of(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_uses_defaults() {
        let config: SessionConfig = toml::from_str("").unwrap();
        assert_eq!(config.throttle_ms, 100);
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.timeouts.long_ms, 30_000);
    }

    #[test]
    fn partial_timeouts_override() {
        let config: SessionConfig = toml::from_str(
            r#"
throttle_ms = 50

[timeouts]
long_ms = 45000
"#,
        )
        .unwrap();
        assert_eq!(config.throttle(), Duration::from_millis(50));
        assert_eq!(config.timeouts.long_ms, 45_000);
        assert_eq!(config.timeouts.short_ms, 2_000);
    }

    #[test]
    fn timeout_depends_on_class() {
        let config = SessionConfig::default();
        assert_eq!(config.timeout_for("0902"), Duration::from_secs(30));
        assert_eq!(config.timeout_for("0101"), Duration::from_secs(10));
        assert_eq!(config.timeout_for("ATSH7E0"), Duration::from_secs(2));
        assert_eq!(config.timeout_for("ATZ"), Duration::from_secs(5));
        assert!(config.timeout_for("222203") > config.timeout_for("03"));
    }
}
