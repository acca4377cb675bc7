//! Core data model for the telemetry engine.
//!
//! This module defines the records that flow through an update cycle:
//! - Glucose readings and calibrations (timestamp-keyed)
//! - Treatments and food records (identity-keyed, action-tagged on delta)
//! - Device status records
//! - Inbound snapshots

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Epoch-millisecond timestamp, the canonical time key for every stream.
pub type Mills = i64;

pub const MS_PER_MINUTE: i64 = 60_000;
pub const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;

/// Convert a (possibly fractional) minute count into milliseconds.
pub fn minutes_to_ms(minutes: f64) -> i64 {
    (minutes * MS_PER_MINUTE as f64).round() as i64
}

// ============================================================================
// Record traits
// ============================================================================

/// Anything keyed by its epoch-millisecond timestamp.
pub trait Timestamped {
    fn mills(&self) -> Mills;
}

/// A record with an opaque identity that may carry a delta action.
pub trait Identified: Timestamped {
    fn record_id(&self) -> Option<&RecordId>;
    fn action(&self) -> Option<&MergeAction>;
    fn clear_action(&mut self);
}

/// Opaque record identity (`_id` on the wire); servers send strings, some
/// uploaders send integers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RecordId {
    Text(String),
    Number(i64),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Text(s) => f.write_str(s),
            RecordId::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId::Text(s.to_string())
    }
}

/// Delta action attached to an identity-keyed record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MergeAction {
    Update,
    Remove,
    #[serde(other)]
    Unknown,
}

// ============================================================================
// Readings
// ============================================================================

/// A sensor glucose value (sgv) or meter reading (mbg).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    #[serde(default)]
    pub mills: Mills,
    #[serde(default, alias = "value")]
    pub mgdl: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtered: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unfiltered: Option<f64>,
    #[serde(default, alias = "deviceId", skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl Timestamped for Reading {
    fn mills(&self) -> Mills {
        self.mills
    }
}

/// Sensor calibration record.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Calibration {
    #[serde(default)]
    pub mills: Mills,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intercept: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slope: Option<f64>,
}

impl Timestamped for Calibration {
    fn mills(&self) -> Mills {
        self.mills
    }
}

// ============================================================================
// Treatments
// ============================================================================

/// A discrete device or clinical event, optionally lasting `duration` minutes.
///
/// Only the fields the engine reasons about are typed; everything else the
/// uploader sent is preserved in `extra` and written back out unchanged.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Treatment {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub mills: Mills,
    #[serde(default)]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_top: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_bottom: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeshift: Option<f64>,
    #[serde(
        rename = "CircadianPercentageProfile",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub circadian_percentage_profile: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuttedby: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cutting: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endmills: Option<Mills>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<MergeAction>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Treatment {
    /// True when the treatment carries a non-zero duration.
    pub fn has_duration(&self) -> bool {
        matches!(self.duration, Some(d) if d != 0.0 && !d.is_nan())
    }

    /// Duration in milliseconds; absent durations count as zero.
    pub fn duration_ms(&self) -> i64 {
        self.duration
            .filter(|d| !d.is_nan())
            .map(minutes_to_ms)
            .unwrap_or(0)
    }

    /// Instant the treatment stops applying; clamps instead of overflowing.
    pub fn end_mills(&self) -> Mills {
        self.mills.saturating_add(self.duration_ms())
    }
}

impl Timestamped for Treatment {
    fn mills(&self) -> Mills {
        self.mills
    }
}

impl Identified for Treatment {
    fn record_id(&self) -> Option<&RecordId> {
        self.id.as_ref()
    }

    fn action(&self) -> Option<&MergeAction> {
        self.action.as_ref()
    }

    fn clear_action(&mut self) {
        self.action = None;
    }
}

/// Food database entry. Shares the action-tagged delta contract with
/// treatments but is otherwise opaque to the engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FoodRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub mills: Mills,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<MergeAction>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Timestamped for FoodRecord {
    fn mills(&self) -> Mills {
        self.mills
    }
}

impl Identified for FoodRecord {
    fn record_id(&self) -> Option<&RecordId> {
        self.id.as_ref()
    }

    fn action(&self) -> Option<&MergeAction> {
        self.action.as_ref()
    }

    fn clear_action(&mut self) {
        self.action = None;
    }
}

// ============================================================================
// Device status
// ============================================================================

/// Top-level keys that identify what kind of device status a record carries.
pub const DEVICE_TYPE_FIELDS: [&str; 5] = ["uploader", "pump", "openaps", "loop", "xdripjs"];

/// Status report uploaded by a device (pump, loop controller, phone uploader).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceStatusRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default)]
    pub mills: Mills,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl DeviceStatusRecord {
    /// The device types this record reports on.
    pub fn device_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        DEVICE_TYPE_FIELDS
            .into_iter()
            .filter(|key| self.fields.contains_key(*key))
    }
}

impl Timestamped for DeviceStatusRecord {
    fn mills(&self) -> Mills {
        self.mills
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// One inbound data message from the transport layer.
///
/// A missing array means "no update" for that stream.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub delta: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sgvs: Option<Vec<Reading>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbgs: Option<Vec<Reading>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treatments: Option<Vec<Treatment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub food: Option<Vec<FoodRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cals: Option<Vec<Calibration>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devicestatus: Option<Vec<DeviceStatusRecord>>,
    /// Raw profile documents; legacy single-profile documents are accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Vec<Value>>,
}
