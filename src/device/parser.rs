//! Decoders for Renpho advertisement payloads and GATT poll readouts.
//!
//! Advertisement vendor payload:
//!
//! | bytes | meaning                                          |
//! |-------|--------------------------------------------------|
//! | 0..2  | prefix `0x52 0x50`                               |
//! | 2     | flags: bit0 stable measurement, bit1 battery     |
//! | 3..5  | weight, u16 LE, 10 g steps (bit0 only)           |
//! | 5     | battery percent (bit1 only)                      |
//!
//! Poll readouts use the standard Weight Scale, Battery and Device
//! Information characteristics.

use super::metrics::MetricKey;
use super::snapshot::{DeviceSnapshot, PollReadout, SnapshotSource};
use crate::bluetooth::gatt::{BATTERY_LEVEL, FIRMWARE_REVISION, HARDWARE_REVISION, WEIGHT_MEASUREMENT};
use crate::bluetooth::{AdvertisementEvent, DeviceAddress};
use crate::error::{BridgeError, Result};
use chrono::{DateTime, Utc};
use log::debug;

pub const ADVERTISEMENT_PREFIX: [u8; 2] = [0x52, 0x50];
const ADVERTISEMENT_MIN_LEN: usize = 3;

const FLAG_STABLE: u8 = 0x01;
const FLAG_BATTERY: u8 = 0x02;
const ADVERTISED_WEIGHT_STEP_GRAMS: f64 = 10.0;

const WEIGHT_FLAG_IMPERIAL: u8 = 0x01;
/// 0.005 kg resolution in SI mode.
const SI_WEIGHT_STEP_GRAMS: f64 = 5.0;
/// 0.01 lb resolution in imperial mode.
const IMPERIAL_WEIGHT_STEP_GRAMS: f64 = 0.01 * 453.592_37;
const WEIGHT_UNSUCCESSFUL: u16 = 0xFFFF;

/// Decode one advertisement into a passive snapshot.
///
/// Signal strength is always recorded. Weight and battery are added only
/// when their flag is set and the bytes are present.
pub fn parse_advertisement(event: &AdvertisementEvent) -> Result<DeviceSnapshot> {
    let payload = event.payload.as_slice();
    if payload.len() < ADVERTISEMENT_MIN_LEN {
        return Err(BridgeError::MalformedPayload(format!(
            "advertisement from {} is {} bytes, expected at least {}",
            event.address,
            payload.len(),
            ADVERTISEMENT_MIN_LEN
        )));
    }
    if payload[..2] != ADVERTISEMENT_PREFIX {
        return Err(BridgeError::MalformedPayload(format!(
            "advertisement from {} has prefix {:02X}{:02X}",
            event.address, payload[0], payload[1]
        )));
    }

    let flags = payload[2];
    let mut snapshot = DeviceSnapshot::new(event.address, SnapshotSource::Advertisement, event.timestamp)
        .with_signal_strength(event.rssi);

    if flags & FLAG_STABLE != 0 {
        match payload.get(3..5) {
            Some(raw) => {
                let steps = u16::from_le_bytes([raw[0], raw[1]]);
                if steps > 0 {
                    snapshot = snapshot
                        .with_value(MetricKey::MassGrams, f64::from(steps) * ADVERTISED_WEIGHT_STEP_GRAMS);
                }
            }
            None => debug!("[BLE] {} flagged a weight but sent none", event.address),
        }
    }

    if flags & FLAG_BATTERY != 0 {
        match payload.get(5) {
            Some(&percent) if percent <= 100 => {
                snapshot = snapshot.with_value(MetricKey::BatteryPercent, f64::from(percent));
            }
            other => debug!("[BLE] {} sent unusable battery byte {:?}", event.address, other),
        }
    }

    Ok(snapshot)
}

/// Decode the characteristics read during an active poll.
///
/// An empty readout is malformed; any single characteristic that does not
/// decode is dropped.
pub fn parse_poll_result(
    address: &DeviceAddress,
    readout: &PollReadout,
    captured_at: DateTime<Utc>,
) -> Result<DeviceSnapshot> {
    if readout.is_empty() {
        return Err(BridgeError::MalformedPayload(format!(
            "poll of {} returned no characteristics",
            address
        )));
    }

    let mut snapshot = DeviceSnapshot::new(*address, SnapshotSource::Poll, captured_at);

    if let Some(raw) = readout.get(&WEIGHT_MEASUREMENT) {
        match decode_weight_measurement(raw) {
            Some(grams) => snapshot = snapshot.with_value(MetricKey::MassGrams, grams),
            None => debug!("[Poll] {} dropped weight measurement {:02X?}", address, raw),
        }
    }

    if let Some(raw) = readout.get(&BATTERY_LEVEL) {
        match raw.first() {
            Some(&percent) if percent <= 100 => {
                snapshot = snapshot.with_value(MetricKey::BatteryPercent, f64::from(percent));
            }
            _ => debug!("[Poll] {} dropped battery level {:02X?}", address, raw),
        }
    }

    if let Some(version) = readout.get(&FIRMWARE_REVISION).and_then(decode_string) {
        snapshot = snapshot.with_sw_version(version);
    }
    if let Some(version) = readout.get(&HARDWARE_REVISION).and_then(decode_string) {
        snapshot = snapshot.with_hw_version(version);
    }

    Ok(snapshot)
}

/// Weight Measurement (0x2A9D) to grams.
fn decode_weight_measurement(raw: &[u8]) -> Option<f64> {
    let (&flags, rest) = raw.split_first()?;
    let value = rest.get(..2)?;
    let steps = u16::from_le_bytes([value[0], value[1]]);
    if steps == WEIGHT_UNSUCCESSFUL {
        return None;
    }

    let grams = if flags & WEIGHT_FLAG_IMPERIAL == 0 {
        f64::from(steps) * SI_WEIGHT_STEP_GRAMS
    } else {
        f64::from(steps) * IMPERIAL_WEIGHT_STEP_GRAMS
    };
    Some((grams * 10.0).round() / 10.0)
}

fn decode_string(raw: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(raw).ok()?;
    let text = text.trim_end_matches('\0').trim();
    (!text.is_empty()).then(|| text.to_string())
}
