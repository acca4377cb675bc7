//! Freshness and device status helpers.

use crate::config::AlarmsConfig;
use crate::types::{Mills, Timestamped, Treatment, MS_PER_MINUTE};
use serde::Serialize;

/// A reading younger than this is considered current.
pub const CURRENT_WINDOW_MS: i64 = 15 * MS_PER_MINUTE;

const OFFLINE_MARKER_EVENT: &str = "OpenAPS Offline";

/// Newest entry at or before `at`. Entries are expected in ascending order.
pub fn last_entry<T: Timestamped>(entries: &[T], at: Mills) -> Option<&T> {
    entries.iter().rev().find(|e| e.mills() <= at)
}

pub fn is_current<T: Timestamped>(entry: &T, at: Mills) -> bool {
    at - entry.mills() <= CURRENT_WINDOW_MS
}

/// The "OpenAPS Offline" marker covering `at`, if any.
pub fn find_offline_marker(treatments: &[Treatment], at: Mills) -> Option<&Treatment> {
    treatments.iter().rev().find(|t| {
        t.event_type == OFFLINE_MARKER_EVENT && t.mills <= at && t.end_mills() >= at
    })
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Staleness {
    Current,
    Warn,
    Urgent,
}

/// Classify how old the last reading is against the alarm settings.
///
/// No reading at all is reported as current; there is nothing to be stale.
pub fn staleness<T: Timestamped>(last: Option<&T>, at: Mills, alarms: &AlarmsConfig) -> Staleness {
    let Some(last) = last else {
        return Staleness::Current;
    };
    let age = at - last.mills();

    if alarms.timeago_urgent && age > alarms.timeago_urgent_mins * MS_PER_MINUTE {
        Staleness::Urgent
    } else if alarms.timeago_warn && age > alarms.timeago_warn_mins * MS_PER_MINUTE {
        Staleness::Warn
    } else {
        Staleness::Current
    }
}

/// Short device name from an uploader URI such as `openaps://rig/pump`.
pub fn device_name(device: Option<&str>) -> String {
    let Some(device) = device else {
        return "unknown".into();
    };
    let last_chunk = device.rsplit("://").next().unwrap_or(device);
    last_chunk.split('/').next().unwrap_or(last_chunk).to_string()
}
