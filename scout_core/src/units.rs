//! Glucose unit conversion and display rounding.

use serde::{Deserialize, Serialize};

pub const MGDL_PER_MMOL: f64 = 18.0;

/// Glucose units a deployment displays in.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum GlucoseUnits {
    #[default]
    #[serde(rename = "mg/dl", alias = "mg/dL", alias = "mgdl")]
    MgDl,
    #[serde(rename = "mmol", alias = "mmol/L")]
    Mmol,
}

/// Pump rounding convention used when showing insulin amounts.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundingStyle {
    #[default]
    Generic,
    Medtronic,
}

/// mg/dL to mmol/L, one decimal.
pub fn mgdl_to_mmol(mgdl: f64) -> f64 {
    (mgdl / MGDL_PER_MMOL * 10.0).round() / 10.0
}

/// mmol/L to whole mg/dL.
pub fn mmol_to_mgdl(mmol: f64) -> f64 {
    (mmol * MGDL_PER_MMOL).round()
}

/// Express an mg/dL value in the display units.
pub fn scale_mgdl(mgdl: f64, units: GlucoseUnits) -> f64 {
    match units {
        GlucoseUnits::Mmol if mgdl != 0.0 => mgdl_to_mmol(mgdl),
        _ => mgdl,
    }
}

pub fn round_bg_for_display(bg: f64, units: GlucoseUnits) -> f64 {
    match units {
        GlucoseUnits::Mmol => (bg * 10.0).round() / 10.0,
        GlucoseUnits::MgDl => bg.round(),
    }
}

pub fn units_label(units: GlucoseUnits) -> &'static str {
    match units {
        GlucoseUnits::Mmol => "mmol/L",
        GlucoseUnits::MgDl => "mg/dl",
    }
}

/// Floor an insulin amount to the pump's delivery increment.
///
/// Medtronic pumps step in 0.05 U up to 0.5 U and 0.1 U above that; everything
/// else is shown to 0.01 U.
pub fn round_insulin_for_display(insulin: f64, style: RoundingStyle) -> String {
    if insulin == 0.0 {
        return "0".into();
    }

    let (step, digits) = match style {
        RoundingStyle::Medtronic if insulin <= 0.5 => (0.05, 2),
        RoundingStyle::Medtronic => (0.1, 1),
        RoundingStyle::Generic => (0.01, 2),
    };

    // Nudge before flooring so 0.3 / 0.1 doesn't land on 2.9999999
    let steps = (insulin / step + 1e-9).floor();
    format!("{:.*}", digits, steps * step)
}

/// Two-decimal rendering that never shows a negative zero.
pub fn format_fixed(value: f64) -> String {
    if value == 0.0 || value.is_nan() {
        return "0".into();
    }
    let fixed = format!("{:.2}", value);
    if fixed == "-0.00" {
        "0.00".into()
    } else {
        fixed
    }
}
