//! Recency partitioning of the dataset for transmission.
//!
//! The payload is split in two so a client can render the recent part first:
//! `recent` carries what a live view needs, `rest` the older history.

use crate::engine::Dataset;
use crate::profile::ProfileDefinition;
use crate::types::{
    Calibration, DeviceStatusRecord, FoodRecord, Mills, Reading, RecordId, Timestamped,
    Treatment,
};
use serde::Serialize;
use std::collections::HashSet;

/// Device status reports kept per (device, type) pair.
pub const DEVICE_STATUS_PER_TYPE: usize = 10;

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct RecentPayload {
    pub treatments: Vec<Treatment>,
    pub devicestatus: Vec<DeviceStatusRecord>,
    pub sgvs: Vec<Reading>,
    pub cals: Vec<Calibration>,
    pub profiles: Vec<ProfileDefinition>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct RestPayload {
    pub treatments: Vec<Treatment>,
    pub mbgs: Vec<Reading>,
    pub food: Vec<FoodRecord>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct SplitPayload {
    pub recent: RecentPayload,
    pub rest: RestPayload,
}

/// Split the dataset at `now - cutoff_ms`.
///
/// Readings older than `now - max_ms` are left out entirely; treatments are
/// only bounded that way when `split_treatments` is set. Profiles go out
/// without switch-injected entries.
pub fn split_recent(
    dataset: &Dataset,
    now: Mills,
    cutoff_ms: i64,
    max_ms: i64,
    split_treatments: bool,
) -> SplitPayload {
    let is_recent = |mills: Mills| mills >= now - cutoff_ms;
    let within_max = |mills: Mills| mills >= now - max_ms;

    let (recent_treatments, rest_treatments): (Vec<Treatment>, Vec<Treatment>) = dataset
        .treatments
        .iter()
        .filter(|t| !split_treatments || within_max(t.mills))
        .cloned()
        .partition(|t| is_recent(t.mills));

    let payload = SplitPayload {
        recent: RecentPayload {
            treatments: recent_treatments,
            devicestatus: recent_device_status(&dataset.devicestatus, now),
            sgvs: dataset
                .sgvs
                .iter()
                .filter(|r| within_max(r.mills))
                .cloned()
                .collect(),
            cals: dataset.cals.clone(),
            profiles: dataset.profiles.stripped_for_transport(),
        },
        rest: RestPayload {
            treatments: rest_treatments,
            mbgs: dataset
                .mbgs
                .iter()
                .filter(|r| within_max(r.mills))
                .cloned()
                .collect(),
            food: dataset.food.clone(),
        },
    };

    tracing::debug!(
        "Split payload: {} recent / {} older treatments, {} sgvs, {} device status",
        payload.recent.treatments.len(),
        payload.rest.treatments.len(),
        payload.recent.sgvs.len(),
        payload.recent.devicestatus.len()
    );
    payload
}

#[derive(PartialEq, Eq, Hash)]
enum StatusKey {
    Id(RecordId),
    Anonymous(Option<String>, Mills),
}

fn status_key(status: &DeviceStatusRecord) -> StatusKey {
    match &status.id {
        Some(id) => StatusKey::Id(id.clone()),
        None => StatusKey::Anonymous(status.device.clone(), status.mills),
    }
}

/// Newest device status reports per (device, type) as of `now`.
///
/// A record reporting several types (pump and loop, say) is counted under
/// each but returned once. Output is sorted ascending by `mills`.
pub fn recent_device_status(
    statuses: &[DeviceStatusRecord],
    now: Mills,
) -> Vec<DeviceStatusRecord> {
    let mut pairs: Vec<(Option<&str>, &'static str)> = Vec::new();
    for status in statuses {
        for kind in status.device_types() {
            let pair = (status.device.as_deref(), kind);
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }
    }

    let mut seen = HashSet::new();
    let mut recent: Vec<DeviceStatusRecord> = Vec::new();
    for (device, kind) in pairs {
        let mut matching: Vec<&DeviceStatusRecord> = statuses
            .iter()
            .filter(|s| s.device.as_deref() == device && s.fields.contains_key(kind))
            .filter(|s| s.mills <= now)
            .collect();
        matching.sort_by_key(|s| s.mills);

        let skip = matching.len().saturating_sub(DEVICE_STATUS_PER_TYPE);
        for status in matching.into_iter().skip(skip) {
            if seen.insert(status_key(status)) {
                recent.push(status.clone());
            }
        }
    }

    recent.sort_by_key(Timestamped::mills);
    recent
}
