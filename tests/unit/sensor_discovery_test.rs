//! Unit tests for sensor discovery filtering.

use ridelink::sensors::protocol::{
    CLIENT_CHARACTERISTIC_CONFIG_UUID, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID,
    RADAR_DATA_UUID, RADAR_SERVICE_UUID,
};
use ridelink::sensors::types::SensorKind;
use uuid::Uuid;

#[test]
fn test_heart_rate_uuids() {
    // Heart Rate Service 0x180D, Measurement 0x2A37
    assert_eq!(
        HEART_RATE_SERVICE_UUID,
        Uuid::parse_str("0000180d-0000-1000-8000-00805f9b34fb").unwrap()
    );
    assert_eq!(
        HEART_RATE_MEASUREMENT_UUID,
        Uuid::parse_str("00002a37-0000-1000-8000-00805f9b34fb").unwrap()
    );
}

#[test]
fn test_radar_uuids() {
    assert_eq!(
        RADAR_SERVICE_UUID.to_string(),
        "6aff7000-56c8-4203-9068-185c32196f33"
    );
    assert_eq!(RADAR_DATA_UUID.to_string(), "6aff7101-56c8-4203-9068-185c32196f33");
}

#[test]
fn test_cccd_uuid() {
    assert_eq!(
        CLIENT_CHARACTERISTIC_CONFIG_UUID.to_string(),
        "00002902-0000-1000-8000-00805f9b34fb"
    );
}

#[test]
fn test_classify_by_advertised_service() {
    assert_eq!(
        SensorKind::from_services(&[HEART_RATE_SERVICE_UUID]),
        Some(SensorKind::HeartRate)
    );
    assert_eq!(
        SensorKind::from_services(&[RADAR_SERVICE_UUID]),
        Some(SensorKind::Radar)
    );
}

#[test]
fn test_unrelated_services_are_filtered() {
    let battery = Uuid::parse_str("0000180f-0000-1000-8000-00805f9b34fb").unwrap();
    let ftms = Uuid::parse_str("00001826-0000-1000-8000-00805f9b34fb").unwrap();

    assert_eq!(SensorKind::from_services(&[]), None);
    assert_eq!(SensorKind::from_services(&[battery, ftms]), None);
    assert_eq!(
        SensorKind::from_services(&[battery, RADAR_SERVICE_UUID]),
        Some(SensorKind::Radar)
    );
}

#[test]
fn test_kind_uuids_are_consistent() {
    for kind in SensorKind::ALL {
        assert_eq!(SensorKind::from_services(&[kind.service_uuid()]), Some(kind));
        assert_ne!(kind.service_uuid(), kind.data_characteristic_uuid());
    }
}

#[test]
fn test_kind_parsing() {
    assert_eq!("hr".parse::<SensorKind>().unwrap(), SensorKind::HeartRate);
    assert_eq!("HR".parse::<SensorKind>().unwrap(), SensorKind::HeartRate);
    assert_eq!("heart_rate".parse::<SensorKind>().unwrap(), SensorKind::HeartRate);
    assert_eq!("Radar".parse::<SensorKind>().unwrap(), SensorKind::Radar);
    assert!("power".parse::<SensorKind>().is_err());
}

#[test]
fn test_kind_display() {
    assert_eq!(SensorKind::HeartRate.to_string(), "Heart Rate");
    assert_eq!(SensorKind::Radar.to_string(), "Radar");
}
