//! Odometer discovery against simulated ECUs.

mod helpers;

use helpers::{GOLF_VIN, Harness, SimEcu, SimulatedVehicle, VehicleProfile};
use vsc_elm327::codec::decode_vin;
use vsc_elm327::{DiagError, OdometerConfig, OdometerEngine};
use vsc_protocol::{OdometerSource, ParsedVin};

async fn ready(profile: VehicleProfile) -> Harness {
    let h = Harness::connected(SimulatedVehicle::new(profile)).await;
    h.adapter.initialize().await.unwrap();
    h
}

fn golf_vin() -> ParsedVin {
    ParsedVin::from_chars(GOLF_VIN.to_string())
}

#[tokio::test(start_paused = true)]
async fn vw_cluster_needs_extended_session() {
    let h = ready(VehicleProfile::vw_golf()).await;

    let reading = OdometerEngine::default()
        .read(&h.adapter, &golf_vin())
        .await
        .unwrap();

    assert_eq!(reading.km, 54_321.0);
    assert_eq!(reading.ecu, "77E");
    assert!(matches!(
        reading.source,
        OdometerSource::ManufacturerDid { did: 0x2203, .. }
    ));

    let writes = h.vehicle.writes();
    let at = |cmd: &str| writes.iter().position(|w| w == cmd).unwrap();
    assert!(at("ATSH714") < at("1003"));
    assert!(at("1003") < at("222203"));
    assert!(at("222203") < at("1001"));
    assert_eq!(writes.last().map(String::as_str), Some("ATAR"));
    assert_eq!(h.vehicle.header(), "7DF");
}

#[tokio::test(start_paused = true)]
async fn negative_responses_move_on_to_next_candidate() {
    let h = ready(VehicleProfile::ford_focus()).await;
    let vin = decode_vin(&h.adapter.send_raw("0902").await.unwrap());

    let reading = OdometerEngine::default().read(&h.adapter, &vin).await.unwrap();

    assert_eq!(reading.km, 123_456.0);
    assert_eq!(reading.ecu, "728");
    let writes = h.vehicle.writes();
    let cluster = writes.iter().position(|w| w == "ATSH720").unwrap();
    let refused = writes.iter().position(|w| w == "22DD01").unwrap();
    let answered = writes.iter().position(|w| w == "22404C").unwrap();
    // DD01 came back 7F 22 31 from the cluster before 404C answered
    assert!(cluster < refused && refused < answered);
    assert_eq!(writes.last().map(String::as_str), Some("ATAR"));
}

#[tokio::test(start_paused = true)]
async fn standard_pid_short_circuits_did_search() {
    let profile = VehicleProfile::vw_golf().answer("01A6", "7E8 06 41 A6 00 08 49 EA");
    let h = ready(profile).await;

    let reading = OdometerEngine::default()
        .read(&h.adapter, &golf_vin())
        .await
        .unwrap();

    assert_eq!(reading.source, OdometerSource::StandardPid);
    assert!((reading.km - 54_321.0).abs() < 1e-6);
    assert!(!h.vehicle.writes().iter().any(|w| w.starts_with("ATSH")));
}

#[tokio::test(start_paused = true)]
async fn implausible_values_are_skipped() {
    // the cluster reports zero for DD01 and the real value under 404C
    let mut profile = VehicleProfile::ford_focus();
    profile.ecus[1] = SimEcu::new("720", "728")
        .with_did(0xDD01, &[0x00, 0x00, 0x00])
        .with_did(0x404C, &[0x01, 0xE2, 0x40]);
    let h = ready(profile).await;
    let vin = decode_vin(&h.adapter.send_raw("0902").await.unwrap());

    let reading = OdometerEngine::default().read(&h.adapter, &vin).await.unwrap();

    assert_eq!(reading.km, 123_456.0);
    assert!(matches!(
        reading.source,
        OdometerSource::ManufacturerDid { did: 0x404C, .. }
    ));
    assert!(h.vehicle.writes().iter().any(|w| w == "22DD01"));
}

#[tokio::test(start_paused = true)]
async fn nothing_answers_within_the_attempt_cap() {
    let profile = VehicleProfile::default()
        .answer("0902", &vsc_elm327::codec::encode_vin(GOLF_VIN, Some("7E8")))
        .ecu(SimEcu::new("7E0", "7E8"));
    let h = ready(profile).await;
    let engine = OdometerEngine::new(OdometerConfig {
        max_did_attempts: 6,
        ..OdometerConfig::default()
    });

    let err = engine.read(&h.adapter, &golf_vin()).await.unwrap_err();

    assert!(matches!(err, DiagError::NotSupported(_)));
    let did_reads = h
        .vehicle
        .writes()
        .iter()
        .filter(|w| w.starts_with("22"))
        .count();
    assert_eq!(did_reads, 6);
    assert_eq!(h.vehicle.header(), "7DF");
}

#[tokio::test(start_paused = true)]
async fn budget_bounds_a_slow_search() {
    let vehicle = SimulatedVehicle::new(VehicleProfile::default().ecu(SimEcu::new("7E0", "7E8")));
    // every DID read times out
    for did in ["222203", "220286", "22F40D", "22F4A6", "22DD01"] {
        vehicle.set_silent(did);
    }
    let h = Harness::connected(vehicle).await;
    h.adapter.initialize().await.unwrap();
    let engine = OdometerEngine::new(OdometerConfig {
        budget_ms: 45_000,
        ..OdometerConfig::default()
    });

    let started = tokio::time::Instant::now();
    let err = engine.read(&h.adapter, &golf_vin()).await.unwrap_err();

    assert!(matches!(err, DiagError::NotSupported(_)));
    assert!(started.elapsed() < std::time::Duration::from_secs(120));
}
