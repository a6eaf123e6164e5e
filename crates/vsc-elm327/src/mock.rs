//! Scripted ELM327 for testing the adapter, odometer, and scan layers
//! without a transport session.
//!
//! Responses are matched by command prefix; the most recently scripted
//! match wins, so tests override the defaults by scripting on top.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use vsc_link::{CommandTransport, TransportError, TransportResult};

enum Scripted {
    Reply(String),
    Fail(TransportError),
}

/// Mock adapter with prefix-matched responses and command recording.
pub struct MockElm {
    /// (prefix, outcome) in registration order.
    script: Mutex<Vec<(String, Scripted)>>,
    /// Every command passed to `send`, normalized.
    sent: Mutex<Vec<String>>,
    /// Simulated adapter latency per command.
    delay: Mutex<Duration>,
}

impl MockElm {
    /// A healthy adapter on an 11-bit CAN vehicle that answers nothing but
    /// the initialization sequence and the warm-up.
    pub fn new() -> Self {
        let mock = Self {
            script: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
        };
        mock.respond("AT", "OK\r\r>");
        mock.respond("ATZ", "\r\rELM327 v1.5\r\r>");
        mock.respond("ATDPN", "A6\r\r>");
        mock.respond("0100", "7E8 06 41 00 BE 3F A8 13\r\r>");
        mock
    }

    /// Answer commands starting with `prefix` with `response` (prompt included).
    pub fn respond(&self, prefix: &str, response: &str) {
        self.script
            .lock()
            .unwrap()
            .push((normalize(prefix), Scripted::Reply(response.to_string())));
    }

    /// Fail commands starting with `prefix` with `error`.
    pub fn fail(&self, prefix: &str, error: TransportError) {
        self.script
            .lock()
            .unwrap()
            .push((normalize(prefix), Scripted::Fail(error)));
    }

    /// Delay every response by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Get copies of all commands that were sent.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Commands sent that start with `prefix`.
    pub fn sent_matching(&self, prefix: &str) -> Vec<String> {
        let prefix = normalize(prefix);
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Default for MockElm {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(cmd: &str) -> String {
    cmd.trim().to_ascii_uppercase()
}

#[async_trait]
impl CommandTransport for MockElm {
    async fn send(&self, command: &str) -> TransportResult<String> {
        let cmd = normalize(command);
        self.sent.lock().unwrap().push(cmd.clone());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let script = self.script.lock().unwrap();
        let hit = script
            .iter()
            .rev()
            .find(|(prefix, _)| cmd.starts_with(prefix.as_str()));
        match hit {
            Some((_, Scripted::Reply(text))) => Ok(text.clone()),
            Some((_, Scripted::Fail(err))) => Err(err.clone()),
            None => Ok("NO DATA\r\r>".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_and_overrides() {
        let mock = MockElm::new();
        assert_eq!(mock.send("ATE0").await.unwrap(), "OK\r\r>");
        assert!(mock.send("ATZ").await.unwrap().contains("ELM327"));
        assert_eq!(mock.send("0902").await.unwrap(), "NO DATA\r\r>");

        mock.respond("09", "7E8 03 49 02 01\r\r>");
        assert!(mock.send("0902").await.unwrap().starts_with("7E8"));

        mock.fail("0902", TransportError::NotConnected);
        assert_eq!(mock.send("0902").await, Err(TransportError::NotConnected));
    }

    #[tokio::test]
    async fn records_commands() {
        let mock = MockElm::new();
        mock.send("atsh7e0").await.unwrap();
        mock.send("0101").await.unwrap();
        assert_eq!(mock.sent(), vec!["ATSH7E0", "0101"]);
        assert_eq!(mock.sent_matching("ATSH"), vec!["ATSH7E0"]);
        mock.clear_sent();
        assert!(mock.sent().is_empty());
    }
}
