//! Complete scans through session, adapter, codec, odometer, and orchestrator.

mod helpers;

use helpers::{FORD_VIN, Harness, SimulatedVehicle, VehicleProfile};
use tokio::sync::mpsc;
use vsc_elm327::AdapterState;
use vsc_protocol::{OdometerSource, ScanStage};

#[tokio::test(start_paused = true)]
async fn ford_scan_populates_every_field() {
    let h = Harness::connected(SimulatedVehicle::new(VehicleProfile::ford_focus())).await;

    let result = h.orchestrator().run("SIM-OBDII").await.unwrap();

    assert_eq!(result.stage, ScanStage::Complete);
    assert_eq!(h.adapter.state(), AdapterState::Ready);
    assert_eq!(result.adapter_version.as_deref(), Some("ELM327 V1.5"));
    assert!(result.protocol.is_some());

    assert!(result.vin.valid);
    assert_eq!(result.vin.vin, FORD_VIN);
    assert_eq!(result.manufacturer.as_deref(), Some("ford"));

    let stored: Vec<&str> = result
        .stored_dtcs
        .as_ref()
        .unwrap()
        .iter()
        .map(|d| d.code.as_str())
        .collect();
    assert_eq!(stored, vec!["P0133", "P0300"]);
    assert_eq!(result.pending_dtcs, Some(Vec::new()));
    assert!(result.permanent_dtcs.is_none());

    let mil = result.mil.as_ref().unwrap();
    assert_eq!(mil.ecu, "7E8");
    assert!(mil.value.mil_on);
    assert_eq!(mil.value.dtc_count, 2);
    assert_eq!(mil.ecu_count(), 2);

    assert_eq!(result.distance_since_cleared_km, Some(300));
    assert_eq!(result.time_since_cleared_min, Some(60));
    assert_eq!(result.warmups_since_cleared, Some(18));
    assert_eq!(result.mil_distance_km, Some(10));
    assert_eq!(result.mil_time_min, Some(5));
    assert!(result.fuel_system.is_some());
    assert!(result.secondary_air.is_some());

    let odometer = result.odometer.as_ref().unwrap();
    assert_eq!(odometer.km, 123_456.0);
    assert_eq!(odometer.ecu, "728");
    assert_eq!(
        odometer.source,
        OdometerSource::ManufacturerDid {
            did: 0x404C,
            manufacturer: Some("ford".into()),
        }
    );

    // back on functional addressing after the DID search
    assert_eq!(h.vehicle.header(), "7DF");
    assert_eq!(h.vehicle.overlapping_writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn check_engine_light_decodes_from_raw_pid() {
    let profile = VehicleProfile::ford_focus().answer("0101", "7E8 06 41 01 83 00 00 00 >");
    let h = Harness::connected(SimulatedVehicle::new(profile)).await;

    let result = h.orchestrator().run("SIM-OBDII").await.unwrap();

    let mil = result.mil.unwrap();
    assert!(mil.value.mil_on);
    assert_eq!(mil.value.dtc_count, 3);
}

#[tokio::test(start_paused = true)]
async fn headerless_vin_decodes() {
    let profile = VehicleProfile::ford_focus().answer(
        "0902",
        "49 02 01 31 46 41 48 50 30 43 44 35 35 4C 30 34 37 38 32 34",
    );
    let h = Harness::connected(SimulatedVehicle::new(profile)).await;

    let result = h.orchestrator().run("SIM-OBDII").await.unwrap();

    assert!(result.vin.valid);
    assert_eq!(result.vin.vin, FORD_VIN);
}

#[tokio::test(start_paused = true)]
async fn one_byte_fragments() {
    let vehicle = SimulatedVehicle::new(VehicleProfile::ford_focus()).with_fragment_size(1);
    let h = Harness::connected(vehicle).await;

    let result = h.orchestrator().run("SIM-OBDII").await.unwrap();

    assert_eq!(result.stage, ScanStage::Complete);
    assert!(result.vin.valid);
    assert_eq!(result.total_dtcs(), 2);
}

#[tokio::test(start_paused = true)]
async fn progress_follows_the_scan() {
    let h = Harness::connected(SimulatedVehicle::new(VehicleProfile::ford_focus())).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scan = h.orchestrator().with_progress(tx);

    scan.run("SIM-OBDII").await.unwrap();
    drop(scan);

    let mut stages = Vec::new();
    while let Some(p) = rx.recv().await {
        stages.push(p.stage);
    }
    assert_eq!(
        stages,
        vec![
            ScanStage::Initializing,
            ScanStage::ReadingVin,
            ScanStage::ReadingDtcs,
            ScanStage::ReadingMil,
            ScanStage::ReadingDistance,
            ScanStage::ReadingTime,
            ScanStage::ReadingWarmups,
            ScanStage::ReadingMilDistance,
            ScanStage::ReadingFuelAirStatus,
            ScanStage::ReadingOdometer,
            ScanStage::Complete,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn result_serializes_for_reporting() {
    let h = Harness::connected(SimulatedVehicle::new(VehicleProfile::ford_focus())).await;
    let result = h.orchestrator().run("SIM-OBDII").await.unwrap();

    let json: serde_json::Value = serde_json::to_value(&result).unwrap();
    assert_eq!(json["vin"]["vin"], FORD_VIN);
    assert_eq!(json["stage"], "complete");
    assert!(json["permanent_dtcs"].is_null());

    let summary = result.summary();
    assert!(summary.contains("P0133"));
    assert!(summary.contains("Permanent DTCs: N/A"));
}
