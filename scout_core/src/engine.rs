//! Update-cycle coordinator.
//!
//! One call per inbound snapshot:
//! - Merge readings, treatments, food, calibrations and device status
//! - Reclassify treatments and resolve their durations
//! - Refresh the profile resolver's treatment view, reload profiles if sent
//! - Re-project display entries
//!
//! The aggregate is consumed and a new one returned; nothing else holds state.

use crate::classify::{classify, ClassifiedTreatments};
use crate::config::Config;
use crate::entries::{project_entries, EntryPoint};
use crate::merge::{merge_identified, merge_timestamped};
use crate::profile::{ProfileResolver, ProfileTreatments};
use crate::types::{
    Calibration, DeviceStatusRecord, FoodRecord, Mills, Reading, Snapshot, Treatment,
};
use serde::{Deserialize, Serialize};

/// The rolling dataset the host keeps between update cycles.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Dataset {
    pub sgvs: Vec<Reading>,
    pub mbgs: Vec<Reading>,
    pub treatments: Vec<Treatment>,
    pub food: Vec<FoodRecord>,
    pub cals: Vec<Calibration>,
    /// Last calibration of the most recent calibration payload
    pub cal: Option<Calibration>,
    pub devicestatus: Vec<DeviceStatusRecord>,
    pub classified: ClassifiedTreatments,
    pub profiles: ProfileResolver,
    pub entries: Vec<EntryPoint>,
    pub last_updated: Option<Mills>,
}

/// Record counts, for logging and the CLI.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct DatasetSummary {
    pub sgvs: usize,
    pub mbgs: usize,
    pub treatments: usize,
    pub food: usize,
    pub cals: usize,
    pub devicestatus: usize,
    pub profile_switches: usize,
    pub temp_basals: usize,
    pub temporary_targets: usize,
    pub profiles: usize,
    pub entries: usize,
    pub last_updated: Option<Mills>,
}

impl Dataset {
    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary {
            sgvs: self.sgvs.len(),
            mbgs: self.mbgs.len(),
            treatments: self.treatments.len(),
            food: self.food.len(),
            cals: self.cals.len(),
            devicestatus: self.devicestatus.len(),
            profile_switches: self.classified.profile_switch.len(),
            temp_basals: self.classified.temp_basal.len(),
            temporary_targets: self.classified.temporary_target.len(),
            profiles: self.profiles.definitions().len(),
            entries: self.entries.len(),
            last_updated: self.last_updated,
        }
    }
}

/// Fold one snapshot into the dataset.
///
/// Incomplete snapshots are fine: every absent array leaves that stream as
/// it was. Device status deltas are merged only with
/// `merge.advanced_devicestatus`; otherwise a device status payload replaces
/// the cached set.
pub fn apply_snapshot(
    dataset: Dataset,
    snapshot: Snapshot,
    now: Mills,
    config: &Config,
) -> Dataset {
    let Snapshot {
        delta,
        sgvs,
        mbgs,
        treatments,
        food,
        cals,
        devicestatus,
        profiles,
    } = snapshot;
    let max_age = Some(config.merge.max_age_ms);
    let mut next = dataset;

    tracing::debug!("Applying {} snapshot at {}", if delta { "delta" } else { "full" }, now);

    next.sgvs = merge_timestamped(delta, std::mem::take(&mut next.sgvs), sgvs, now, max_age);
    next.mbgs = merge_timestamped(delta, std::mem::take(&mut next.mbgs), mbgs, now, max_age);
    next.treatments = merge_identified(delta, std::mem::take(&mut next.treatments), treatments);
    next.food = merge_identified(delta, std::mem::take(&mut next.food), food);

    if let Some(cals) = cals {
        next.cal = cals.last().cloned();
        next.cals = cals;
    }

    if let Some(statuses) = devicestatus {
        next.devicestatus = if config.merge.advanced_devicestatus {
            merge_timestamped(
                delta,
                std::mem::take(&mut next.devicestatus),
                Some(statuses),
                now,
                max_age,
            )
        } else {
            statuses
        };
    }

    next.classified = classify(&next.treatments);

    next.profiles
        .set_fallback_timezone(config.display.timezone.clone());
    next.profiles.update_treatments(ProfileTreatments::new(
        next.classified.profile_switch.clone(),
        next.classified.temp_basal.clone(),
        next.classified.combo_bolus.clone(),
    ));
    if let Some(raw) = profiles {
        next.profiles.load_profiles(&raw);
    }

    next.entries = project_entries(
        &next.sgvs,
        &next.mbgs,
        now,
        config.display.history_hours,
        &config.display.theme,
        &config.thresholds,
    );
    next.last_updated = Some(now);

    tracing::info!(
        "Update cycle complete: {} sgvs, {} treatments, {} entries",
        next.sgvs.len(),
        next.treatments.len(),
        next.entries.len()
    );
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::last_entry;
    use crate::types::{MergeAction, RecordId, MS_PER_HOUR, MS_PER_MINUTE};
    use serde_json::json;

    /// 2024-01-15T12:00:00Z
    const NOW: Mills = 1_705_320_000_000;

    fn reading(mills: Mills, mgdl: f64) -> Reading {
        Reading {
            mills,
            mgdl,
            ..Default::default()
        }
    }

    fn treatment(id: &str, mills: Mills, event_type: &str) -> Treatment {
        Treatment {
            id: Some(RecordId::from(id)),
            mills,
            event_type: event_type.into(),
            ..Default::default()
        }
    }

    fn profile_doc() -> serde_json::Value {
        json!({
            "defaultProfile": "Default",
            "startDate": "2024-01-01T00:00:00Z",
            "store": {
                "Default": {
                    "timezone": "UTC",
                    "basal": [{"time": "00:00", "value": 1.0}, {"time": "06:00", "value": 1.2}],
                    "sens": [{"time": "00:00", "value": 100}],
                    "target_low": [{"time": "00:00", "value": 90}],
                    "target_high": [{"time": "00:00", "value": 140}]
                }
            }
        })
    }

    fn full_snapshot() -> Snapshot {
        let mut temp = treatment("t1", NOW - 2 * MS_PER_HOUR, "Temp Basal");
        temp.duration = Some(60.0);
        temp.absolute = Some(0.5);

        Snapshot {
            delta: false,
            sgvs: Some(vec![
                reading(NOW - 10 * MS_PER_MINUTE, 110.0),
                reading(NOW - 5 * MS_PER_MINUTE, 115.0),
            ]),
            mbgs: Some(vec![]),
            treatments: Some(vec![temp, treatment("t2", NOW - MS_PER_HOUR, "Site Change")]),
            food: Some(vec![]),
            cals: Some(vec![Calibration {
                mills: NOW - MS_PER_HOUR,
                slope: Some(900.0),
                ..Default::default()
            }]),
            devicestatus: None,
            profiles: Some(vec![profile_doc()]),
        }
    }

    #[test]
    fn test_full_then_delta_cycle() {
        let config = Config::default();
        let dataset = apply_snapshot(Dataset::default(), full_snapshot(), NOW, &config);

        assert_eq!(dataset.sgvs.len(), 2);
        assert_eq!(dataset.classified.temp_basal.len(), 1);
        assert_eq!(dataset.classified.site_change.len(), 1);
        assert!(dataset.cal.is_some());
        assert!(dataset.profiles.has_data());
        assert_eq!(dataset.entries.len(), 2);
        assert_eq!(dataset.last_updated, Some(NOW));

        let mut removal = treatment("t2", 0, "Site Change");
        removal.action = Some(MergeAction::Remove);
        let delta = Snapshot {
            delta: true,
            sgvs: Some(vec![reading(NOW, 120.0), reading(NOW - 5 * MS_PER_MINUTE, 999.0)]),
            treatments: Some(vec![removal]),
            ..Default::default()
        };
        let later = apply_snapshot(dataset, delta, NOW + 1_000, &config);

        assert_eq!(later.sgvs.len(), 3);
        assert_eq!(later.sgvs[1].mgdl, 115.0);
        assert!(later.classified.site_change.is_empty());
        assert_eq!(later.cals.len(), 1);
        assert!(later.profiles.has_data());
    }

    #[test]
    fn test_full_snapshot_in_descending_order_is_sorted() {
        let snapshot = Snapshot {
            sgvs: Some(vec![
                reading(NOW - MS_PER_MINUTE, 300.0),
                reading(NOW - 2 * MS_PER_MINUTE, 200.0),
                reading(NOW - 3 * MS_PER_MINUTE, 100.0),
            ]),
            treatments: Some(vec![
                treatment("late", NOW - MS_PER_MINUTE, "Note"),
                treatment("early", NOW - MS_PER_HOUR, "Note"),
            ]),
            ..Default::default()
        };
        let dataset = apply_snapshot(Dataset::default(), snapshot, NOW, &Config::default());

        let mgdl: Vec<f64> = dataset.sgvs.iter().map(|r| r.mgdl).collect();
        assert_eq!(mgdl, vec![100.0, 200.0, 300.0]);
        assert_eq!(last_entry(&dataset.sgvs, NOW).map(|r| r.mgdl), Some(300.0));
        assert_eq!(dataset.treatments[0].id, Some(RecordId::from("early")));
    }

    #[test]
    fn test_huge_duration_does_not_break_cycle() {
        let mut temp = treatment("t1", NOW - MS_PER_HOUR, "Temp Basal");
        temp.duration = Some(1e300);
        temp.absolute = Some(0.5);
        let snapshot = Snapshot {
            treatments: Some(vec![temp, treatment("t2", NOW - 30 * MS_PER_MINUTE, "Temp Basal")]),
            profiles: Some(vec![profile_doc()]),
            ..Default::default()
        };
        let dataset = apply_snapshot(Dataset::default(), snapshot, NOW, &Config::default());

        assert_eq!(dataset.classified.temp_basal.len(), 1);
        assert_eq!(dataset.classified.temp_basal[0].duration, Some(30.0));
        assert!(dataset.profiles.temp_basal_at(NOW, None).is_some());
    }

    #[test]
    fn test_profile_view_tracks_temp_basals() {
        let config = Config::default();
        let dataset = apply_snapshot(Dataset::default(), full_snapshot(), NOW, &config);

        let during = dataset
            .profiles
            .temp_basal_at(NOW - 90 * MS_PER_MINUTE, None)
            .unwrap();
        assert_eq!(during.basal, 1.2);
        assert_eq!(during.tempbasal, 0.5);
        assert!(!dataset.profiles.profile_fields_missing(NOW));
    }

    #[test]
    fn test_empty_snapshot_changes_nothing_but_projection() {
        let config = Config::default();
        let dataset = apply_snapshot(Dataset::default(), full_snapshot(), NOW, &config);
        let before = dataset.summary();

        let after = apply_snapshot(dataset, Snapshot::default(), NOW, &config);
        assert_eq!(after.summary(), before);
    }

    #[test]
    fn test_device_status_replace_vs_merge() {
        let status = |id: &str, mills: Mills| DeviceStatusRecord {
            id: Some(RecordId::from(id)),
            device: Some("openaps://rig".into()),
            mills,
            ..Default::default()
        };
        let first = Snapshot {
            devicestatus: Some(vec![status("a", NOW - 1_000)]),
            ..Default::default()
        };
        let second = Snapshot {
            delta: true,
            devicestatus: Some(vec![status("b", NOW)]),
            ..Default::default()
        };

        let plain = Config::default();
        let replaced = apply_snapshot(Dataset::default(), first.clone(), NOW, &plain);
        let replaced = apply_snapshot(replaced, second.clone(), NOW, &plain);
        assert_eq!(replaced.devicestatus.len(), 1);

        let mut advanced = Config::default();
        advanced.merge.advanced_devicestatus = true;
        let merged = apply_snapshot(Dataset::default(), first, NOW, &advanced);
        let merged = apply_snapshot(merged, second, NOW, &advanced);
        assert_eq!(merged.devicestatus.len(), 2);
    }

    #[test]
    fn test_dataset_serde_roundtrip() {
        let config = Config::default();
        let dataset = apply_snapshot(Dataset::default(), full_snapshot(), NOW, &config);

        let json = serde_json::to_string(&dataset).unwrap();
        let restored: Dataset = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.summary(), dataset.summary());
        assert_eq!(
            restored.profiles.basal(NOW, None),
            dataset.profiles.basal(NOW, None)
        );
    }
}
