//! Display-ready glucose points.

use crate::config::ThresholdsConfig;
use crate::types::{Mills, Reading, Timestamped, MS_PER_HOUR};
use serde::{Deserialize, Serialize};

/// Readings below this (mg/dL) are sensor error codes, not glucose values.
pub const RENDER_FLOOR_MGDL: f64 = 39.0;

pub const DEFAULT_WINDOW_HOURS: i64 = 48;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PointColor {
    #[serde(rename = "grey")]
    Grey,
    #[serde(rename = "red")]
    Red,
    #[serde(rename = "yellow")]
    Yellow,
    #[serde(rename = "#4cff00")]
    InRange,
    #[serde(rename = "transparent")]
    Transparent,
}

impl PointColor {
    pub fn as_str(self) -> &'static str {
        match self {
            PointColor::Grey => "grey",
            PointColor::Red => "red",
            PointColor::Yellow => "yellow",
            PointColor::InRange => "#4cff00",
            PointColor::Transparent => "transparent",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Sgv,
    Mbg,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Sgv => "sgv",
            EntryKind::Mbg => "mbg",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EntryPoint {
    pub mills: Mills,
    pub mgdl: f64,
    pub color: PointColor,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtered: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unfiltered: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl Timestamped for EntryPoint {
    fn mills(&self) -> Mills {
        self.mills
    }
}

/// Colour band for a sensor value.
///
/// The `default` theme is monochrome. Other themes colour high and low bands;
/// only `colors` also highlights the target range.
pub fn sgv_to_color(sgv: f64, theme: &str, thresholds: &ThresholdsConfig) -> PointColor {
    if theme == "default" {
        return PointColor::Grey;
    }

    if sgv > thresholds.bg_high {
        PointColor::Red
    } else if sgv > thresholds.bg_target_top {
        PointColor::Yellow
    } else if sgv >= thresholds.bg_target_bottom && theme == "colors" {
        PointColor::InRange
    } else if sgv < thresholds.bg_low {
        PointColor::Red
    } else if sgv < thresholds.bg_target_bottom {
        PointColor::Yellow
    } else {
        PointColor::Grey
    }
}

/// Project sensor and meter readings into points for the last `window_hours`.
///
/// Meter readings are always red. Points below 39 mg/dL stay in the output
/// (so gaps are not mistaken for missing data) but are made transparent.
pub fn project_entries(
    sgvs: &[Reading],
    mbgs: &[Reading],
    now: Mills,
    window_hours: i64,
    theme: &str,
    thresholds: &ThresholdsConfig,
) -> Vec<EntryPoint> {
    let too_old = now - window_hours * MS_PER_HOUR;

    let sensor = sgvs.iter().map(|r| EntryPoint {
        mills: r.mills,
        mgdl: r.mgdl,
        color: sgv_to_color(r.mgdl, theme, thresholds),
        kind: EntryKind::Sgv,
        direction: r.direction.clone(),
        noise: r.noise,
        filtered: r.filtered,
        unfiltered: r.unfiltered,
        device: None,
    });
    let meter = mbgs.iter().map(|r| EntryPoint {
        mills: r.mills,
        mgdl: r.mgdl,
        color: PointColor::Red,
        kind: EntryKind::Mbg,
        direction: None,
        noise: None,
        filtered: None,
        unfiltered: None,
        device: r.device.clone(),
    });

    let mut entries: Vec<EntryPoint> = sensor
        .chain(meter)
        .filter(|e| e.mills > too_old)
        .map(|mut e| {
            if e.mgdl < RENDER_FLOOR_MGDL {
                e.color = PointColor::Transparent;
            }
            e
        })
        .collect();
    entries.sort_by_key(|e| e.mills);
    entries
}
