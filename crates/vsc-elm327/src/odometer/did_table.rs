//! Static odometer DID table and ECU addressing.

use super::manufacturer::DidFamily;

/// One candidate odometer Data Identifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DidSpec {
    pub did: u16,
    /// Documented width; informational only, decoding uses the bytes received.
    pub bytes: u8,
    /// Multiplier from the raw value to kilometres.
    pub scale: f64,
    pub label: &'static str,
}

const fn did(did: u16, bytes: u8, scale: f64, label: &'static str) -> DidSpec {
    DidSpec {
        did,
        bytes,
        scale,
        label,
    }
}

/// An ECU addressed physically: request header and response id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcuAddress {
    /// Header for `ATSH`, e.g. `7E0`.
    pub request: String,
    /// Response id for `ATCRA`, e.g. `7E8`.
    pub response: String,
    /// Needs DiagnosticSessionControl (extended) before DIDs answer.
    pub extended_session: bool,
}

impl EcuAddress {
    pub fn new(request: &str, response: &str, extended_session: bool) -> Self {
        Self {
            request: request.to_string(),
            response: response.to_string(),
            extended_session,
        }
    }

    /// Address for an 11-bit response id seen on the bus (`7E8` → `7E0`).
    pub fn from_response_id(response: &str) -> Option<Self> {
        if let Some(known) = known_ecus().into_iter().find(|e| e.response == response) {
            return Some(known);
        }
        if response.len() != 3 {
            return None;
        }
        let id = u16::from_str_radix(response, 16).ok()?;
        let request = id.checked_sub(8)?;
        Some(Self::new(&format!("{request:03X}"), response, false))
    }
}

/// VW-group instrument cluster. Odometer lives here and needs an extended session.
pub fn vw_cluster() -> EcuAddress {
    EcuAddress::new("714", "77E", true)
}

/// Fixed fallback order: engine, transmission, clusters, body.
pub fn known_ecus() -> Vec<EcuAddress> {
    vec![
        EcuAddress::new("7E0", "7E8", false),
        EcuAddress::new("7E1", "7E9", false),
        EcuAddress::new("720", "728", false),
        vw_cluster(),
        EcuAddress::new("7C0", "7C8", false),
    ]
}

/// Functional (broadcast) request header.
pub const FUNCTIONAL_HEADER: &str = "7DF";

// ── DIDs ─────────────────────────────────────────────────────

const VW_GROUP: &[DidSpec] = &[
    did(0x2203, 3, 1.0, "cluster total distance"),
    did(0x0286, 3, 1.0, "cluster odometer"),
    did(0xF40D, 4, 0.1, "cluster odometer (0.1 km)"),
];

const BMW: &[DidSpec] = &[
    did(0xD10D, 3, 1.0, "total distance"),
    did(0x1001, 4, 1.0, "KOMBI mileage"),
];

const MERCEDES: &[DidSpec] = &[
    did(0x0110, 4, 0.1, "odometer"),
    did(0x2101, 3, 1.0, "IC total distance"),
];

const FORD: &[DidSpec] = &[
    did(0xDD01, 3, 1.0, "total distance"),
    did(0x404C, 3, 1.0, "IPC odometer"),
];

const GM: &[DidSpec] = &[
    did(0x4001, 4, 0.1, "odometer"),
    did(0x0DF1, 3, 1.0, "IPC odometer"),
];

const TOYOTA: &[DidSpec] = &[
    did(0x2101, 3, 1.0, "odometer"),
    did(0x1021, 3, 1.0, "combination meter distance"),
];

const HONDA: &[DidSpec] = &[did(0x2215, 3, 1.0, "odometer")];

const NISSAN: &[DidSpec] = &[
    did(0x1101, 3, 1.0, "odometer"),
    did(0x0E01, 3, 1.0, "meter total distance"),
];

const HYUNDAI_KIA: &[DidSpec] = &[
    did(0xB002, 3, 1.0, "cluster odometer"),
    did(0x0100, 3, 1.0, "odometer"),
];

const MAZDA: &[DidSpec] = &[did(0xDD01, 3, 1.0, "total distance")];

const SUBARU: &[DidSpec] = &[did(0x1008, 3, 1.0, "odometer")];

const MITSUBISHI: &[DidSpec] = &[did(0x2801, 3, 1.0, "odometer")];

const VOLVO: &[DidSpec] = &[did(0xDD01, 3, 1.0, "total distance")];

const STELLANTIS: &[DidSpec] = &[
    did(0x2002, 3, 1.0, "odometer"),
    did(0xDD01, 3, 1.0, "total distance"),
];

const RENAULT: &[DidSpec] = &[did(0x0206, 3, 1.0, "odometer")];

const JLR: &[DidSpec] = &[did(0xDD01, 3, 1.0, "total distance")];

const TESLA: &[DidSpec] = &[did(0xDD01, 4, 0.1, "odometer")];

/// Appended to every manufacturer list.
pub const GENERIC: &[DidSpec] = &[
    did(0xF4A6, 4, 0.1, "OBD odometer"),
    did(0xDD01, 3, 1.0, "total distance"),
    did(0x2203, 3, 1.0, "total distance"),
];

fn family_dids(family: DidFamily) -> &'static [DidSpec] {
    match family {
        DidFamily::VwGroup => VW_GROUP,
        DidFamily::Bmw => BMW,
        DidFamily::Mercedes => MERCEDES,
        DidFamily::Ford => FORD,
        DidFamily::Gm => GM,
        DidFamily::Toyota => TOYOTA,
        DidFamily::Honda => HONDA,
        DidFamily::Nissan => NISSAN,
        DidFamily::HyundaiKia => HYUNDAI_KIA,
        DidFamily::Mazda => MAZDA,
        DidFamily::Subaru => SUBARU,
        DidFamily::Mitsubishi => MITSUBISHI,
        DidFamily::Volvo => VOLVO,
        DidFamily::Stellantis => STELLANTIS,
        DidFamily::Renault => RENAULT,
        DidFamily::Jlr => JLR,
        DidFamily::Tesla => TESLA,
    }
}

/// Manufacturer DIDs first, then the generic ones, without repeats.
pub fn candidate_dids(family: Option<DidFamily>) -> Vec<DidSpec> {
    let specific = family.map(family_dids).unwrap_or(&[]);
    let mut out: Vec<DidSpec> = Vec::new();
    for spec in specific.iter().chain(GENERIC) {
        if !out.iter().any(|s| s.did == spec.did) {
            out.push(*spec);
        }
    }
    out
}

/// ECU search order for one discovery run.
///
/// VW group: cluster first. Then ECUs that answered the functional probe,
/// then the fixed list.
pub fn ecu_order(family: Option<DidFamily>, discovered: &[String]) -> Vec<EcuAddress> {
    let mut order: Vec<EcuAddress> = Vec::new();
    let mut push = |ecu: EcuAddress| {
        if !order.iter().any(|e| e.request == ecu.request) {
            order.push(ecu);
        }
    };
    if family == Some(DidFamily::VwGroup) {
        push(vw_cluster());
    }
    for id in discovered {
        if let Some(ecu) = EcuAddress::from_response_id(id) {
            push(ecu);
        }
    }
    for ecu in known_ecus() {
        push(ecu);
    }
    order
}
