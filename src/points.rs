// MIT License - Copyright (c) 2026 agshub contributors

//! Point vocabulary for AGSHome alarm hubs.
//!
//! The hub exposes its state as numbered "points" (string-indexed registers).
//! The mapping below was confirmed against a live DP-W2.1 hub running
//! protocol 3.4. Keys are not required to be present in every snapshot.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Alarm mode: "1"=away, "2"=disarmed, "3"=home.
pub const ALARM_MODE: &str = "101";
/// Alarm triggered (bool).
pub const ALARM_TRIGGERED: &str = "103";
/// Siren on/off (bool). Shared function with the night light.
pub const SIREN: &str = "104";
/// Alarm/siren duration (int).
pub const ALARM_DURATION: &str = "105";
/// Volume level (string enum, e.g. "7").
pub const VOLUME: &str = "106";
/// Entry/exit delay in seconds (string integer, e.g. "25").
pub const ENTRY_DELAY: &str = "107";
/// Zone 1 enabled (bool).
pub const ZONE_1_ENABLED: &str = "111";
/// Zone 2 enabled (bool).
pub const ZONE_2_ENABLED: &str = "112";
/// Zone 1 sensitivity (int).
pub const ZONE_1_SENSITIVITY: &str = "113";
/// Zone 2 sensitivity (int).
pub const ZONE_2_SENSITIVITY: &str = "114";
/// Last sensor name (base64-wrapped wide-character text).
pub const SENSOR_EVENT: &str = "116";
/// Status notification text (base64-wrapped wide-character text).
pub const NOTIFICATION: &str = "121";

/// Alarm operating modes (point 101 values, confirmed from a live device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmMode {
    Away,
    Disarmed,
    Home,
}

impl AlarmMode {
    /// Parse the wire value ("1"/"2"/"3").
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "1" => Some(Self::Away),
            "2" => Some(Self::Disarmed),
            "3" => Some(Self::Home),
            _ => None,
        }
    }

    /// The wire string representation.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Away => "1",
            Self::Disarmed => "2",
            Self::Home => "3",
        }
    }

    /// Display label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Away => "AWAY",
            Self::Disarmed => "DISARMED",
            Self::Home => "HOME",
        }
    }
}

impl fmt::Display for AlarmMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Hub volume levels (point 106 values).
///
/// The firmware treats this as a string enum; mute ("0") and the loudest
/// setting ("7") were confirmed from a live unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeLevel {
    Mute,
    Low,
    Middle,
    High,
}

impl VolumeLevel {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Mute => "0",
            Self::Low => "2",
            Self::Middle => "5",
            Self::High => "7",
        }
    }
}

impl fmt::Display for VolumeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Canonical value of a single point.
///
/// Each point has exactly one canonical variant (booleans for
/// triggered/siren/zone-enable, integers for durations and sensitivities,
/// text for everything else). Any widening or narrowing from the device's
/// on-wire encoding happens in the Device Link implementation, never in the
/// core modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl PointValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for PointValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for PointValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for PointValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for PointValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// A full point snapshot: point index → value, ordered by index.
pub type PointMap = BTreeMap<String, PointValue>;

/// Human-readable name for a known point index.
pub fn point_name(index: &str) -> Option<&'static str> {
    match index {
        ALARM_MODE => Some("Alarm Mode"),
        ALARM_TRIGGERED => Some("Alarm Triggered"),
        SIREN => Some("Siren"),
        ALARM_DURATION => Some("Alarm Duration"),
        VOLUME => Some("Volume"),
        ENTRY_DELAY => Some("Entry/Exit Delay"),
        ZONE_1_ENABLED => Some("Zone 1 Enabled"),
        ZONE_2_ENABLED => Some("Zone 2 Enabled"),
        ZONE_1_SENSITIVITY => Some("Zone 1 Sensitivity"),
        ZONE_2_SENSITIVITY => Some("Zone 2 Sensitivity"),
        SENSOR_EVENT => Some("Sensor Event"),
        NOTIFICATION => Some("Notification"),
        _ => None,
    }
}

/// Return a human-readable description of a point value.
pub fn describe_point(index: &str, value: &PointValue) -> String {
    let name = point_name(index)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Point {index}"));

    if index == ALARM_MODE
        && let Some(mode) = value.as_str().and_then(AlarmMode::from_wire)
    {
        return format!("{name}: {}", mode.label());
    }

    match value {
        PointValue::Bool(b) => format!("{name}: {}", if *b { "ON" } else { "OFF" }),
        other => format!("{name}: {other}"),
    }
}

/// Decode a base64-wrapped wide-character text payload (sensor names,
/// notifications).
///
/// The firmware encodes text as a big-endian u16 character count followed by
/// UTF-16BE code units; some builds omit the count, in which case the whole
/// buffer is little-endian code units. On any mismatch the raw encoded value
/// is returned unchanged; a garbled name must never abort event decoding.
pub fn decode_wide_text(raw: &str) -> String {
    try_decode_wide_text(raw).unwrap_or_else(|| raw.to_string())
}

fn try_decode_wide_text(raw: &str) -> Option<String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(raw.trim())
        .ok()?;

    if bytes.len() >= 2 {
        let count = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
        let rest = &bytes[2..];
        if rest.len() == count * 2 {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            if let Ok(text) = String::from_utf16(&units) {
                return Some(text);
            }
        }
    }

    // No length prefix: whole buffer as little-endian code units.
    if !bytes.is_empty() && bytes.len() % 2 == 0 {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        if units.iter().all(|u| *u != 0)
            && let Ok(text) = String::from_utf16(&units)
        {
            return Some(text);
        }
    }

    None
}

/// Encode text the way the firmware does (count-prefixed UTF-16BE, base64).
///
/// Inverse of [`decode_wide_text`]; used by the simulated hub.
pub fn encode_wide_text(text: &str) -> String {
    let units: Vec<u16> = text.encode_utf16().collect();
    let mut bytes = Vec::with_capacity(2 + units.len() * 2);
    bytes.extend_from_slice(&(units.len() as u16).to_be_bytes());
    for unit in &units {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_mode_wire() {
        assert_eq!(AlarmMode::from_wire("1"), Some(AlarmMode::Away));
        assert_eq!(AlarmMode::from_wire("2"), Some(AlarmMode::Disarmed));
        assert_eq!(AlarmMode::from_wire("3"), Some(AlarmMode::Home));
        assert_eq!(AlarmMode::from_wire("4"), None);
        assert_eq!(AlarmMode::Home.as_wire(), "3");
    }

    #[test]
    fn test_describe_point() {
        assert_eq!(
            describe_point(ALARM_MODE, &PointValue::from("3")),
            "Alarm Mode: HOME"
        );
        assert_eq!(
            describe_point(SIREN, &PointValue::Bool(true)),
            "Siren: ON"
        );
        assert_eq!(
            describe_point(ENTRY_DELAY, &PointValue::from("25")),
            "Entry/Exit Delay: 25"
        );
        assert_eq!(
            describe_point("199", &PointValue::Int(4)),
            "Point 199: 4"
        );
    }

    #[test]
    fn test_wide_text_roundtrip() {
        for name in ["Front Door", "Hallway PIR", "门厅"] {
            let encoded = encode_wide_text(name);
            assert_eq!(decode_wide_text(&encoded), name);
        }
    }

    #[test]
    fn test_wide_text_le_fallback() {
        // UTF-16LE payload without a count prefix.
        let bytes: Vec<u8> = "Garage"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        assert_eq!(decode_wide_text(&encoded), "Garage");
    }

    #[test]
    fn test_wide_text_degrades_to_raw() {
        // Not base64 at all.
        assert_eq!(decode_wide_text("not//base64!!"), "not//base64!!");
        // Valid base64 but odd-length, prefixless payload.
        let encoded = base64::engine::general_purpose::STANDARD.encode([0x01, 0x02, 0x03]);
        assert_eq!(decode_wide_text(&encoded), encoded);
    }

    #[test]
    fn test_point_value_accessors() {
        assert_eq!(PointValue::Bool(true).as_bool(), Some(true));
        assert_eq!(PointValue::from("3").as_bool(), None);
        assert_eq!(PointValue::Int(7).as_int(), Some(7));
        assert_eq!(PointValue::from("7").as_str(), Some("7"));
        assert_eq!(PointValue::from("7").to_string(), "7");
    }

    #[test]
    fn test_point_value_serde_untagged() {
        let map: PointMap = serde_json::from_str(
            r#"{"101": "2", "103": false, "105": 3}"#,
        )
        .unwrap();
        assert_eq!(map.get("101"), Some(&PointValue::from("2")));
        assert_eq!(map.get("103"), Some(&PointValue::Bool(false)));
        assert_eq!(map.get("105"), Some(&PointValue::Int(3)));
    }
}
