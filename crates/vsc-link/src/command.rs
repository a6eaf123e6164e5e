//! Command classification for timeout selection.

/// Broad class of an adapter command; each class has its own timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandClass {
    /// Adapter reboot (`ATZ`, `ATWS`).
    Reset,
    /// AT configuration: echo, headers, header/filter selection, protocol.
    AdapterConfig,
    /// Mode 01 PIDs and DTC reads (03 / 07 / 0A).
    ObdData,
    /// VIN, odometer PID, and UDS requests: the adapter may have to search
    /// the bus or wait on a slow ECU before answering.
    BusSearch,
}

/// UDS services that are routed to specific ECUs and often answer slowly.
const UDS_SERVICES: &[&str] = &["10", "19", "22", "27", "3E"];

impl CommandClass {
    pub fn of(command: &str) -> Self {
        let cmd: String = command
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();

        if let Some(at) = cmd.strip_prefix("AT") {
            return match at {
                "Z" | "WS" => CommandClass::Reset,
                _ => CommandClass::AdapterConfig,
            };
        }

        if cmd.starts_with("09") || cmd.starts_with("01A6") {
            return CommandClass::BusSearch;
        }
        if cmd.len() >= 4 && UDS_SERVICES.iter().any(|s| cmd.starts_with(s)) {
            return CommandClass::BusSearch;
        }
        CommandClass::ObdData
    }
}
