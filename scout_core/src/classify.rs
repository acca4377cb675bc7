//! Treatment classification.
//!
//! Splits the merged treatment stream into the buckets the rendering layer and
//! the profile resolver consume. Categories are matched on `eventType` and are
//! not mutually exclusive: a "Sensor Site Change" lands in both the site and
//! the sensor buckets.

use crate::durations::resolve_durations;
use crate::types::Treatment;
use crate::units::MGDL_PER_MMOL;
use serde::{Deserialize, Serialize};

/// Temp-target values below this are assumed to be mmol/L.
const MMOL_HEURISTIC_CEILING: f64 = 20.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentCategory {
    SiteChange,
    InsulinChange,
    PumpBatteryChange,
    Sensor,
    ProfileSwitch,
    ComboBolus,
    TempBasal,
    TemporaryTarget,
}

impl TreatmentCategory {
    pub const ALL: [TreatmentCategory; 8] = [
        TreatmentCategory::SiteChange,
        TreatmentCategory::InsulinChange,
        TreatmentCategory::PumpBatteryChange,
        TreatmentCategory::Sensor,
        TreatmentCategory::ProfileSwitch,
        TreatmentCategory::ComboBolus,
        TreatmentCategory::TempBasal,
        TreatmentCategory::TemporaryTarget,
    ];

    /// Case-sensitive match against an `eventType`.
    pub fn matches(self, event_type: &str) -> bool {
        match self {
            TreatmentCategory::SiteChange => event_type.contains("Site Change"),
            TreatmentCategory::InsulinChange => event_type.contains("Insulin Change"),
            TreatmentCategory::PumpBatteryChange => event_type.contains("Pump Battery Change"),
            TreatmentCategory::Sensor => event_type.contains("Sensor"),
            TreatmentCategory::ProfileSwitch => event_type == "Profile Switch",
            TreatmentCategory::ComboBolus => event_type == "Combo Bolus",
            TreatmentCategory::TempBasal => event_type.contains("Temp Basal"),
            TreatmentCategory::TemporaryTarget => event_type.contains("Temporary Target"),
        }
    }
}

/// Every category a treatment belongs to.
pub fn categories_of(treatment: &Treatment) -> Vec<TreatmentCategory> {
    TreatmentCategory::ALL
        .into_iter()
        .filter(|c| c.matches(&treatment.event_type))
        .collect()
}

/// Treatments bucketed by category, each bucket sorted ascending by `mills`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ClassifiedTreatments {
    pub site_change: Vec<Treatment>,
    pub insulin_change: Vec<Treatment>,
    pub pump_battery_change: Vec<Treatment>,
    pub sensor: Vec<Treatment>,
    pub profile_switch: Vec<Treatment>,
    pub combo_bolus: Vec<Treatment>,
    pub temp_basal: Vec<Treatment>,
    pub temporary_target: Vec<Treatment>,
}

impl ClassifiedTreatments {
    pub fn get(&self, category: TreatmentCategory) -> &[Treatment] {
        match category {
            TreatmentCategory::SiteChange => &self.site_change,
            TreatmentCategory::InsulinChange => &self.insulin_change,
            TreatmentCategory::PumpBatteryChange => &self.pump_battery_change,
            TreatmentCategory::Sensor => &self.sensor,
            TreatmentCategory::ProfileSwitch => &self.profile_switch,
            TreatmentCategory::ComboBolus => &self.combo_bolus,
            TreatmentCategory::TempBasal => &self.temp_basal,
            TreatmentCategory::TemporaryTarget => &self.temporary_target,
        }
    }

    fn bucket_mut(&mut self, category: TreatmentCategory) -> &mut Vec<Treatment> {
        match category {
            TreatmentCategory::SiteChange => &mut self.site_change,
            TreatmentCategory::InsulinChange => &mut self.insulin_change,
            TreatmentCategory::PumpBatteryChange => &mut self.pump_battery_change,
            TreatmentCategory::Sensor => &mut self.sensor,
            TreatmentCategory::ProfileSwitch => &mut self.profile_switch,
            TreatmentCategory::ComboBolus => &mut self.combo_bolus,
            TreatmentCategory::TempBasal => &mut self.temp_basal,
            TreatmentCategory::TemporaryTarget => &mut self.temporary_target,
        }
    }
}

/// Convert a temporary target to mg/dL.
///
/// A `units` tag of `mmol` converts both bounds. Independently, any bound
/// still below 20 is taken to be mmol/L whatever the tag says.
pub fn normalize_target_units(treatment: &mut Treatment) {
    if treatment.units.as_deref() == Some("mmol") {
        treatment.target_top = treatment.target_top.map(|v| v * MGDL_PER_MMOL);
        treatment.target_bottom = treatment.target_bottom.map(|v| v * MGDL_PER_MMOL);
        treatment.units = Some("mg/dl".into());
    }

    let mut repaired = false;
    for bound in [&mut treatment.target_top, &mut treatment.target_bottom] {
        if let Some(v) = bound.as_mut().filter(|v| **v < MMOL_HEURISTIC_CEILING) {
            *v *= MGDL_PER_MMOL;
            repaired = true;
        }
    }
    if repaired {
        treatment.units = Some("mg/dl".into());
    }
}

/// Bucket, sort and resolve durations for the full treatment stream.
///
/// Profile switches keep zero-length entries (they are open-ended switches);
/// temp basals and temporary targets that get cut to nothing are dropped.
pub fn classify(all: &[Treatment]) -> ClassifiedTreatments {
    let mut classified = ClassifiedTreatments::default();

    for treatment in all {
        for category in categories_of(treatment) {
            let mut copy = treatment.clone();
            if category == TreatmentCategory::TemporaryTarget {
                normalize_target_units(&mut copy);
            }
            classified.bucket_mut(category).push(copy);
        }
    }

    for category in TreatmentCategory::ALL {
        classified.bucket_mut(category).sort_by_key(|t| t.mills);
    }

    classified.profile_switch =
        resolve_durations(std::mem::take(&mut classified.profile_switch), true);
    classified.temp_basal = resolve_durations(std::mem::take(&mut classified.temp_basal), false);
    classified.temporary_target =
        resolve_durations(std::mem::take(&mut classified.temporary_target), false);

    tracing::debug!(
        "Classified {} treatments: {} profile switches, {} temp basals, {} temp targets",
        all.len(),
        classified.profile_switch.len(),
        classified.temp_basal.len(),
        classified.temporary_target.len()
    );

    classified
}
