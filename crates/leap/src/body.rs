//! The body-type catalog.
//!
//! A response body is decoded by dispatching on the header's
//! `MessageBodyType` tag against this fixed set of shapes. Callers pattern
//! match on [`Body`]; tags outside the catalog surface as
//! `DecodeError::UnimplementedBodyType` at decode time. Unknown fields
//! inside a known shape are tolerated.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Tagged union over the known body shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    OneDeviceDefinition(OneDeviceDefinition),
    MultipleDeviceDefinition(MultipleDeviceDefinition),
    OneZoneStatus(OneZoneStatus),
    OnePingResponse(OnePingResponse),
    ExceptionDetail(ExceptionDetail),
}

impl Body {
    /// Decode a raw body value as the shape named by `kind`.
    pub fn parse(kind: &str, raw: serde_json::Value) -> Result<Self, DecodeError> {
        match kind {
            "OneDeviceDefinition" => Ok(Self::OneDeviceDefinition(serde_json::from_value(raw)?)),
            "MultipleDeviceDefinition" => {
                Ok(Self::MultipleDeviceDefinition(serde_json::from_value(raw)?))
            }
            "OneZoneStatus" => Ok(Self::OneZoneStatus(serde_json::from_value(raw)?)),
            "OnePingResponse" => Ok(Self::OnePingResponse(serde_json::from_value(raw)?)),
            "ExceptionDetail" => Ok(Self::ExceptionDetail(serde_json::from_value(raw)?)),
            other => Err(DecodeError::UnimplementedBodyType(other.to_owned())),
        }
    }
}

/// A resource path reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Href {
    #[serde(default)]
    pub href: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OneDeviceDefinition {
    #[serde(rename = "Device")]
    pub device: Device,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultipleDeviceDefinition {
    #[serde(rename = "Devices")]
    pub devices: Vec<Device>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OneZoneStatus {
    #[serde(rename = "ZoneStatus")]
    pub zone_status: ZoneStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnePingResponse {
    #[serde(rename = "PingResponse")]
    pub ping_response: PingResponse,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PingResponse {
    #[serde(rename = "LEAPVersion")]
    pub leap_version: f64,
}

/// Error detail the bridge attaches to exception responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExceptionDetail {
    #[serde(rename = "Message")]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Device {
    pub href: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "FullyQualifiedName")]
    pub fully_qualified_name: Vec<String>,
    #[serde(rename = "Parent")]
    pub parent: Option<Href>,
    #[serde(rename = "SerialNumber")]
    pub serial_number: Option<String>,
    #[serde(rename = "ModelNumber")]
    pub model_number: Option<String>,
    #[serde(rename = "DeviceType")]
    pub device_type: String,
    #[serde(rename = "LocalZones")]
    pub local_zones: Vec<Href>,
    #[serde(rename = "AssociatedArea")]
    pub associated_area: Option<Href>,
    #[serde(rename = "OccupancySensors")]
    pub occupancy_sensors: Vec<Href>,
    #[serde(rename = "LinkNodes")]
    pub link_nodes: Vec<Href>,
    #[serde(rename = "DeviceRules")]
    pub device_rules: Vec<Href>,
    #[serde(rename = "RepeaterProperties")]
    pub repeater_properties: Option<RepeaterProperties>,
    #[serde(rename = "FirmwareImage")]
    pub firmware_image: Option<FirmwareImage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeaterProperties {
    #[serde(rename = "IsRepeater")]
    pub is_repeater: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareImage {
    #[serde(rename = "Firmware")]
    pub firmware: Option<Firmware>,
    #[serde(rename = "Installed")]
    pub installed: Option<InstalledDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Firmware {
    #[serde(rename = "DisplayName")]
    pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstalledDate {
    #[serde(rename = "Year")]
    pub year: u16,
    #[serde(rename = "Month")]
    pub month: u8,
    #[serde(rename = "Day")]
    pub day: u8,
    #[serde(rename = "Hour")]
    pub hour: u8,
    #[serde(rename = "Minute")]
    pub minute: u8,
    #[serde(rename = "Second")]
    pub second: u8,
    #[serde(rename = "Utc")]
    pub utc: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneStatus {
    pub href: String,
    #[serde(rename = "Level")]
    pub level: Option<u8>,
    #[serde(rename = "SwitchedLevel")]
    pub switched_level: Option<SwitchedLevel>,
    #[serde(rename = "FanSpeed")]
    pub fan_speed: Option<FanSpeed>,
    #[serde(rename = "Zone")]
    pub zone: Option<Href>,
    #[serde(rename = "StatusAccuracy")]
    pub status_accuracy: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchedLevel {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FanSpeed {
    High,
    MediumHigh,
    Medium,
    Low,
    Off,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_status_decodes_partial_payload() {
        let raw = serde_json::json!({
            "ZoneStatus": {"href": "/zone/1/status", "Level": 75, "Zone": {"href": "/zone/1"}}
        });
        match Body::parse("OneZoneStatus", raw).unwrap() {
            Body::OneZoneStatus(s) => {
                assert_eq!(s.zone_status.level, Some(75));
                assert_eq!(s.zone_status.zone.unwrap().href, "/zone/1");
                assert!(s.zone_status.fan_speed.is_none());
            }
            other => panic!("wrong body: {other:?}"),
        }
    }

    #[test]
    fn ping_response_carries_version() {
        let raw = serde_json::json!({"PingResponse": {"LEAPVersion": 1.115}});
        match Body::parse("OnePingResponse", raw).unwrap() {
            Body::OnePingResponse(p) => assert_eq!(p.ping_response.leap_version, 1.115),
            other => panic!("wrong body: {other:?}"),
        }
    }

    #[test]
    fn device_tolerates_unknown_fields() {
        let raw = serde_json::json!({
            "Devices": [{
                "href": "/device/2",
                "Name": "Dimmer",
                "DeviceType": "WallDimmer",
                "SomeFutureField": {"Nested": true}
            }]
        });
        match Body::parse("MultipleDeviceDefinition", raw).unwrap() {
            Body::MultipleDeviceDefinition(d) => {
                assert_eq!(d.devices[0].device_type, "WallDimmer");
            }
            other => panic!("wrong body: {other:?}"),
        }
    }
}
