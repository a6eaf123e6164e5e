//! Adapter text → per-ECU byte messages.
//!
//! Handles the output shapes an ELM327 produces:
//! - headers on, 11-bit CAN: `7E8 06 41 01 83 00 00 00`
//! - headers on, 29-bit CAN: `18 DA F1 10 06 41 01 83 00 00 00`
//! - headers off: `41 01 83 00 00 00`
//! - headers off multi-frame: `014` / `0: 49 02 01 31 46 41` / `1: ...`
//! - spaces off variants of all of the above
//!
//! With headers on, ISO-TP single/first/consecutive frames are reassembled
//! per ECU. Lines that do not look like ISO-TP are kept verbatim so the
//! decoders' marker search still works on them.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;
use vsc_link::buffer::TERMINAL_ERRORS;
use vsc_protocol::{EcuResponseMap, UNKNOWN_ECU};

/// ECU id → every message it sent for one request, in arrival order.
pub type EcuMessages = BTreeMap<String, Vec<Vec<u8>>>;

static INDEXED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9A-F]):\s*([0-9A-F ]*)$").unwrap());

static LENGTH_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9A-F]{3}$").unwrap());

/// Adapter-level outcome of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Hex data or an acknowledgment such as `OK`.
    Data,
    /// `NO DATA`: nothing on the bus answered.
    NoData,
    /// `?`: the adapter did not understand the command.
    Unknown,
    /// A bus or adapter error phrase.
    Error(String),
}

/// Split raw adapter text into meaningful upper-case lines.
///
/// Drops the prompt, blank lines, and `SEARCHING...` / `BUS INIT` progress.
pub fn clean_lines(raw: &str) -> Vec<String> {
    raw.split(['\r', '\n'])
        .map(|l| l.replace('>', "").trim().to_ascii_uppercase())
        .filter(|l| !l.is_empty())
        .filter(|l| !l.starts_with("SEARCHING"))
        .filter(|l| !(l.starts_with("BUS INIT") && !l.contains("ERROR")))
        .collect()
}

/// Classify a raw response. Any hex data line wins over error phrases.
pub fn classify(raw: &str) -> Reply {
    let lines = clean_lines(raw);
    if lines.iter().any(|l| parse_line(l).is_some() || INDEXED_LINE.is_match(l)) {
        return Reply::Data;
    }
    if lines.iter().any(|l| l == "?") {
        return Reply::Unknown;
    }
    if lines.iter().any(|l| l.contains("NO DATA")) {
        return Reply::NoData;
    }
    if let Some(line) = lines.iter().find(|l| {
        TERMINAL_ERRORS.iter().any(|p| l.contains(p)) || is_error_code(l)
    }) {
        return Reply::Error(line.clone());
    }
    Reply::Data
}

/// `ERRxx` internal adapter error codes.
fn is_error_code(line: &str) -> bool {
    line.strip_prefix("ERR")
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
}

/// Decode hex digits (whitespace ignored) into bytes.
pub fn hex_bytes(text: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = text.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return None;
    }
    digits
        .chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(s, 16).ok()
        })
        .collect()
}

/// One adapter line: optional CAN header plus data bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Option<String>,
    pub bytes: Vec<u8>,
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Parse one cleaned line; `None` for anything that is not frame data.
pub fn parse_line(line: &str) -> Option<Frame> {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    if tokens.len() == 1 {
        let s = tokens[0];
        if !is_hex(s) || s.len() <= 3 {
            return None;
        }
        if s.len() % 2 == 1 {
            return Some(Frame {
                header: Some(s[..3].to_string()),
                bytes: hex_bytes(&s[3..])?,
            });
        }
        if s.len() >= 10 && s.starts_with("18DA") {
            return Some(Frame {
                header: Some(s[..8].to_string()),
                bytes: hex_bytes(&s[8..])?,
            });
        }
        return Some(Frame {
            header: None,
            bytes: hex_bytes(s)?,
        });
    }

    if !tokens.iter().all(|t| is_hex(t)) {
        return None;
    }
    let (header, data) = if tokens[0].len() == 3 {
        (Some(tokens[0].to_string()), &tokens[1..])
    } else if tokens.len() >= 5 && tokens[0] == "18" && tokens[1] == "DA" {
        (Some(tokens[..4].concat()), &tokens[4..])
    } else {
        (None, &tokens[..])
    };
    if data.is_empty() || data.iter().any(|t| t.len() != 2) {
        return None;
    }
    Some(Frame {
        header,
        bytes: hex_bytes(&data.concat())?,
    })
}

// ── ISO-TP reassembly ─────────────────────────────────────────

const PCI_SINGLE: u8 = 0x0;
const PCI_FIRST: u8 = 0x1;
const PCI_CONSECUTIVE: u8 = 0x2;
const PCI_FLOW_CONTROL: u8 = 0x3;

struct Partial {
    expected: usize,
    next_seq: u8,
    data: Vec<u8>,
}

#[derive(Default)]
struct Assembler {
    out: EcuMessages,
    partial: BTreeMap<String, Partial>,
    indexed: Option<Partial>,
}

impl Assembler {
    fn push(&mut self, ecu: &str, message: Vec<u8>) {
        if !message.is_empty() {
            self.out.entry(ecu.to_string()).or_default().push(message);
        }
    }

    fn frame(&mut self, ecu: String, bytes: Vec<u8>) {
        let Some(&pci) = bytes.first() else {
            return;
        };
        match pci >> 4 {
            PCI_SINGLE => {
                let len = usize::from(pci & 0x0F);
                let end = if len == 0 { bytes.len() } else { (1 + len).min(bytes.len()) };
                self.push(&ecu, bytes[1..end].to_vec());
            }
            PCI_FIRST if bytes.len() >= 2 => {
                let expected = (usize::from(pci & 0x0F) << 8) | usize::from(bytes[1]);
                let data = bytes[2..].to_vec();
                if data.len() >= expected {
                    self.push(&ecu, data[..expected].to_vec());
                } else {
                    self.partial.insert(
                        ecu,
                        Partial {
                            expected,
                            next_seq: 1,
                            data,
                        },
                    );
                }
            }
            PCI_CONSECUTIVE => {
                let complete = match self.partial.get_mut(&ecu) {
                    Some(p) => {
                        let seq = pci & 0x0F;
                        if seq != p.next_seq {
                            debug!(ecu = %ecu, expected = p.next_seq, got = seq, "ISO-TP sequence gap");
                        }
                        p.next_seq = (seq + 1) & 0x0F;
                        let remaining = p.expected.saturating_sub(p.data.len());
                        let end = (1 + remaining).min(bytes.len());
                        p.data.extend_from_slice(&bytes[1..end]);
                        p.data.len() >= p.expected
                    }
                    None => {
                        // consecutive frame without a first frame: keep the data
                        self.push(&ecu, bytes[1..].to_vec());
                        false
                    }
                };
                if complete {
                    if let Some(done) = self.partial.remove(&ecu) {
                        self.push(&ecu, done.data);
                    }
                }
            }
            PCI_FLOW_CONTROL => {}
            _ => self.push(&ecu, bytes),
        }
    }

    fn flush_indexed(&mut self) {
        if let Some(mut p) = self.indexed.take() {
            if p.expected > 0 {
                p.data.truncate(p.expected);
            }
            self.push(UNKNOWN_ECU, p.data);
        }
    }

    fn finish(mut self) -> EcuMessages {
        self.flush_indexed();
        for (ecu, p) in std::mem::take(&mut self.partial) {
            debug!(ecu = %ecu, have = p.data.len(), expected = p.expected, "incomplete ISO-TP message");
            self.push(&ecu, p.data);
        }
        self.out
    }
}

/// Parse raw adapter text into every message each ECU sent.
pub fn parse_messages(raw: &str) -> EcuMessages {
    let mut asm = Assembler::default();

    for line in clean_lines(raw) {
        if LENGTH_LINE.is_match(&line) {
            asm.flush_indexed();
            asm.indexed = Some(Partial {
                expected: usize::from_str_radix(&line, 16).unwrap_or(0),
                next_seq: 0,
                data: Vec::new(),
            });
            continue;
        }
        if let Some(caps) = INDEXED_LINE.captures(&line) {
            let Some(bytes) = hex_bytes(&caps[2]) else {
                continue;
            };
            asm.indexed
                .get_or_insert_with(|| Partial {
                    expected: 0,
                    next_seq: 0,
                    data: Vec::new(),
                })
                .data
                .extend(bytes);
            continue;
        }
        let Some(frame) = parse_line(&line) else {
            continue;
        };
        match frame.header {
            Some(header) => asm.frame(header, frame.bytes),
            None => asm.push(UNKNOWN_ECU, frame.bytes),
        }
    }

    asm.finish()
}

/// Parse raw adapter text into one concatenated payload per ECU.
pub fn parse_response(raw: &str) -> EcuResponseMap {
    parse_messages(raw)
        .into_iter()
        .map(|(ecu, messages)| (ecu, messages.concat()))
        .collect()
}

/// Pick the ECU to decode: `preferred` if it answered, else the first
/// (lowest id) whose messages satisfy `accept`.
pub fn select_ecu<'a>(
    messages: &'a EcuMessages,
    preferred: &'a str,
    accept: impl Fn(&[Vec<u8>]) -> bool,
) -> Option<(&'a str, &'a [Vec<u8>])> {
    if let Some(m) = messages.get(preferred).filter(|m| accept(m)) {
        return Some((preferred, m.as_slice()));
    }
    messages
        .iter()
        .find(|(_, m)| accept(m))
        .map(|(ecu, m)| (ecu.as_str(), m.as_slice()))
}

/// Flat heuristic: every data byte in the response, in order, with CAN
/// headers and leading ISO-TP frame-type bytes stripped per line.
///
/// Used when structured parsing finds no usable message.
pub fn flat_bytes(raw: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for line in clean_lines(raw) {
        let body = match line.split_once(':') {
            Some((_, rest)) => rest.to_string(),
            None => line,
        };
        let mut tokens = body.split_whitespace().peekable();
        if tokens.peek().is_some_and(|t| t.len() == 3) {
            tokens.next();
            let pci = tokens.peek().and_then(|t| u8::from_str_radix(t, 16).ok());
            if let Some(pci) = pci.filter(|b| *b < 0x30) {
                tokens.next();
                if pci >> 4 == PCI_FIRST {
                    tokens.next();
                }
            }
        }
        out.extend(
            tokens
                .filter(|t| t.len() == 2)
                .filter_map(|t| u8::from_str_radix(t, 16).ok()),
        );
    }
    out
}

// ── Encoding ──────────────────────────────────────────────────

fn hex_line(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render `payload` the way an ELM327 prints it (no prompt).
///
/// With a header, payloads over seven bytes are split into ISO-TP first
/// and consecutive frames. Without one, they use the indexed `n:` format.
pub fn encode_frames(header: Option<&str>, payload: &[u8]) -> Vec<String> {
    match header {
        Some(h) if payload.len() <= 7 => {
            vec![format!("{h} {:02X} {}", payload.len(), hex_line(payload))]
        }
        Some(h) => {
            let len = payload.len().min(0xFFF);
            let mut lines = vec![format!(
                "{h} {:02X} {:02X} {}",
                0x10 | (len >> 8) as u8,
                (len & 0xFF) as u8,
                hex_line(&payload[..6])
            )];
            for (i, chunk) in payload[6..len].chunks(7).enumerate() {
                let seq = ((i + 1) & 0x0F) as u8;
                lines.push(format!("{h} {:02X} {}", 0x20 | seq, hex_line(chunk)));
            }
            lines
        }
        None if payload.len() <= 7 => vec![hex_line(payload)],
        None => {
            let mut lines = vec![format!("{:03X}", payload.len())];
            lines.push(format!("0: {}", hex_line(&payload[..6])));
            for (i, chunk) in payload[6..].chunks(7).enumerate() {
                lines.push(format!("{:X}: {}", (i + 1) & 0x0F, hex_line(chunk)));
            }
            lines
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headered_single_frame() {
        let map = parse_response("7E8 06 41 01 83 00 00 00 >");
        assert_eq!(map["7E8"], vec![0x41, 0x01, 0x83, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn compact_header_and_padding() {
        let map = parse_response("7E806410183000000AA\r\r>");
        assert_eq!(map["7E8"], vec![0x41, 0x01, 0x83, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn headerless_lines_go_to_unknown_ecu() {
        let map = parse_response("SEARCHING...\r41 0D 3C\r\r>");
        assert_eq!(map[UNKNOWN_ECU], vec![0x41, 0x0D, 0x3C]);
    }

    #[test]
    fn multiple_ecus_are_separated() {
        let raw = "7E8 06 41 01 83 07 65 04\r7E9 06 41 01 00 04 00 00\r\r>";
        let map = parse_response(raw);
        assert_eq!(map.len(), 2);
        assert_eq!(map["7E8"][2], 0x83);
        assert_eq!(map["7E9"][2], 0x00);
    }

    #[test]
    fn multi_frame_reassembly() {
        let raw = "7E8 10 14 49 02 01 31 46 41\r\
                   7E8 21 48 50 30 43 44 35 35\r\
                   7E8 22 4C 30 34 37 38 32 34\r\r>";
        let map = parse_response(raw);
        let payload = &map["7E8"];
        assert_eq!(payload.len(), 0x14);
        assert_eq!(&payload[..3], &[0x49, 0x02, 0x01]);
        assert_eq!(payload[19], 0x34);
    }

    #[test]
    fn interleaved_multi_frame_from_two_ecus() {
        let raw = "7E8 10 0A 62 F1 90 01 02 03\r\
                   7E9 03 7F 22 31\r\
                   7E8 21 04 05 06 07\r>";
        let msgs = parse_messages(raw);
        assert_eq!(msgs["7E8"], vec![vec![0x62, 0xF1, 0x90, 1, 2, 3, 4, 5, 6, 7]]);
        assert_eq!(msgs["7E9"], vec![vec![0x7F, 0x22, 0x31]]);
    }

    #[test]
    fn indexed_format() {
        let raw = "014\r0: 49 02 01 31 46 41\r1: 48 50 30 43 44 35 35\r2: 4C 30 34 37 38 32 34\r\r>";
        let map = parse_response(raw);
        let payload = &map[UNKNOWN_ECU];
        assert_eq!(payload.len(), 20);
        assert_eq!(payload[3], 0x31);
    }

    #[test]
    fn extended_29_bit_header() {
        let map = parse_response("18 DA F1 10 03 41 0D 3C\r>");
        assert_eq!(map["18DAF110"], vec![0x41, 0x0D, 0x3C]);
    }

    #[test]
    fn pending_and_final_are_separate_messages() {
        let msgs = parse_messages("77E 03 7F 22 78\r77E 05 62 22 03 30 39\r>");
        assert_eq!(msgs["77E"].len(), 2);
    }

    #[test]
    fn classify_replies() {
        assert_eq!(classify("SEARCHING...\rNO DATA\r\r>"), Reply::NoData);
        assert_eq!(classify("?\r\r>"), Reply::Unknown);
        assert_eq!(classify("CAN ERROR\r\r>"), Reply::Error("CAN ERROR".into()));
        assert_eq!(classify("ERR94\r>"), Reply::Error("ERR94".into()));
        assert_eq!(classify("OK\r\r>"), Reply::Data);
        assert_eq!(classify("7E8 03 41 0D 3C\r>"), Reply::Data);
    }

    #[test]
    fn flat_heuristic_strips_headers_and_pci() {
        let raw = "7E8 10 0B 49 02 01 31 46 41\r7E8 21 48 50 30 43 44\r>";
        assert_eq!(
            flat_bytes(raw),
            vec![0x49, 0x02, 0x01, 0x31, 0x46, 0x41, 0x48, 0x50, 0x30, 0x43, 0x44]
        );
    }

    #[test]
    fn non_data_lines_are_ignored() {
        assert!(parse_line("ELM327 V1.5").is_none());
        assert!(parse_line("OK").is_none());
        assert!(parse_line("STOPPED").is_none());
    }

    #[test]
    fn encoder_matches_parser() {
        let payload: Vec<u8> = (0u8..20).collect();
        let text = encode_frames(Some("7E8"), &payload).join("\r");
        assert_eq!(parse_response(&text)["7E8"], payload);

        let text = encode_frames(None, &payload).join("\r");
        assert_eq!(parse_response(&text)[UNKNOWN_ECU], payload);

        let short = [0x41, 0x0D, 0x3C];
        assert_eq!(encode_frames(Some("7E8"), &short), vec!["7E8 03 41 0D 3C"]);
        assert_eq!(encode_frames(None, &short), vec!["41 0D 3C"]);
    }
}
