//! Profile store and time-indexed setting resolution.
//!
//! A profile definition holds a store of named profiles. Each profile maps a
//! setting (`basal`, `sens`, `carbratio`, `target_low`, `target_high`, `dia`,
//! `timezone`, ...) to either a scalar or a time-of-day schedule. The
//! resolver answers "what was the effective value of this setting at this
//! instant", taking into account:
//! - which named profile a Profile Switch treatment made active
//! - circadian percentage overrides (percentage scaling plus a time shift)
//! - the profile's declared timezone for time-of-day lookup
//!
//! The first definition (newest start date) is authoritative for name lookup.

use crate::types::{Mills, RecordId, Treatment, MS_PER_HOUR, MS_PER_MINUTE};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Separator between a switch's profile name and its start time for profiles
/// injected from a switch's embedded `profileJson`.
pub const INJECTED_PROFILE_MARKER: &str = "@@@@@";

/// Store key given to legacy single-profile documents.
pub const LEGACY_PROFILE_NAME: &str = "Default";

const CACHE_CAPACITY: usize = 4096;

// ============================================================================
// Profile documents
// ============================================================================

/// One step of a time-of-day schedule.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScheduleEntry {
    pub time: String,
    #[serde(
        rename = "timeAsSeconds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub time_as_seconds: Option<i64>,
    #[serde(default)]
    pub value: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ScheduleEntry {
    fn seconds(&self) -> Option<i64> {
        self.time_as_seconds
            .or_else(|| time_string_to_seconds(&self.time))
    }
}

/// A profile setting: a time-of-day schedule or a plain value.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ProfileValue {
    Schedule(Vec<ScheduleEntry>),
    Scalar(Value),
}

pub type ProfileBody = BTreeMap<String, ProfileValue>;

/// A dated set of named profiles.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDefinition {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default)]
    pub mills: Mills,
    pub default_profile: String,
    #[serde(default)]
    pub store: BTreeMap<String, ProfileBody>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub converted_on_the_fly: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Settings the resolver knows how to look up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProfileField {
    Basal,
    Sens,
    CarbRatio,
    TargetLow,
    TargetHigh,
    Dia,
}

impl ProfileField {
    pub const ALL: [ProfileField; 6] = [
        ProfileField::Basal,
        ProfileField::Sens,
        ProfileField::CarbRatio,
        ProfileField::TargetLow,
        ProfileField::TargetHigh,
        ProfileField::Dia,
    ];

    /// Key of this setting inside a profile body.
    pub fn key(self) -> &'static str {
        match self {
            ProfileField::Basal => "basal",
            ProfileField::Sens => "sens",
            ProfileField::CarbRatio => "carbratio",
            ProfileField::TargetLow => "target_low",
            ProfileField::TargetHigh => "target_high",
            ProfileField::Dia => "dia",
        }
    }
}

/// "HH:MM" (or "HH:MM:SS") to seconds since midnight.
pub fn time_string_to_seconds(time: &str) -> Option<i64> {
    let mut parts = time.trim().split(':');
    let hours: i64 = parts.next()?.trim().parse().ok()?;
    let minutes: i64 = parts.next()?.trim().parse().ok()?;
    let seconds: i64 = match parts.next() {
        Some(s) => s.trim().parse().ok()?,
        None => 0,
    };
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Recompute `timeAsSeconds` for every schedule entry in a profile body,
/// including entries nested inside untyped values.
pub fn annotate_body(body: &mut ProfileBody) {
    for value in body.values_mut() {
        match value {
            ProfileValue::Schedule(entries) => {
                for entry in entries {
                    entry.time_as_seconds = time_string_to_seconds(&entry.time);
                }
            }
            ProfileValue::Scalar(v) => annotate_value(v),
        }
    }
}

fn annotate_value(value: &mut Value) {
    match value {
        Value::Array(items) => items.iter_mut().for_each(annotate_value),
        Value::Object(map) => {
            let seconds = map
                .get("time")
                .and_then(Value::as_str)
                .and_then(time_string_to_seconds);
            if let Some(seconds) = seconds {
                map.insert("timeAsSeconds".into(), Value::from(seconds));
            }
            for nested in map.values_mut().filter(|v| v.is_array()) {
                annotate_value(nested);
            }
        }
        _ => {}
    }
}

/// Parse a definition's `startDate` into epoch milliseconds.
fn parse_start_mills(start: &str) -> Option<Mills> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(start) {
        return Some(dt.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(start, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Normalize raw profile documents into definitions.
///
/// Documents without a `defaultProfile` predate named profiles; their body is
/// wrapped into a store with a single `Default` entry. Documents that still
/// fail to parse are skipped with a warning.
pub fn convert_to_profile_store(raw: &[Value]) -> Vec<ProfileDefinition> {
    let mut converted = Vec::with_capacity(raw.len());

    for doc in raw {
        let Some(map) = doc.as_object() else {
            tracing::warn!("Skipping profile document that is not an object");
            continue;
        };

        let has_default = map
            .get("defaultProfile")
            .and_then(Value::as_str)
            .is_some_and(|name| !name.is_empty());

        let normalized = if has_default {
            let mut map = map.clone();
            map.remove("convertedOnTheFly");
            Value::Object(map)
        } else {
            let mut body = map.clone();
            let start_date = body.remove("startDate").unwrap_or(Value::Null);
            let id = body.remove("_id").unwrap_or(Value::Null);
            body.remove("created_at");
            tracing::info!(
                "Converting legacy profile document into a '{}' store",
                LEGACY_PROFILE_NAME
            );
            serde_json::json!({
                "defaultProfile": LEGACY_PROFILE_NAME,
                "store": { LEGACY_PROFILE_NAME: body },
                "startDate": start_date,
                "_id": id,
                "convertedOnTheFly": true,
            })
        };

        match serde_json::from_value::<ProfileDefinition>(normalized) {
            Ok(definition) => converted.push(definition),
            Err(e) => tracing::warn!("Skipping unreadable profile document: {}", e),
        }
    }

    converted
}

fn injected_name(name: &str, mills: Mills) -> String {
    if name.contains(INJECTED_PROFILE_MARKER) {
        name.to_string()
    } else {
        format!("{}{}{}", name, INJECTED_PROFILE_MARKER, mills)
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn round_to_minute(ms: Mills) -> Mills {
    ms.saturating_add(MS_PER_MINUTE / 2).div_euclid(MS_PER_MINUTE) * MS_PER_MINUTE
}

fn local_seconds<Z: TimeZone>(ms: Mills, zone: &Z) -> Option<i64> {
    let utc = Utc.timestamp_millis_opt(ms).single()?;
    Some(i64::from(utc.with_timezone(zone).num_seconds_from_midnight()))
}

// ============================================================================
// Treatment view
// ============================================================================

/// The treatments the resolver needs, with content hashes for change detection.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfileTreatments {
    pub profile_switches: Vec<Treatment>,
    pub temp_basals: Vec<Treatment>,
    pub combo_boluses: Vec<Treatment>,
    pub profile_switches_hash: String,
    pub temp_basals_hash: String,
    pub combo_boluses_hash: String,
}

impl ProfileTreatments {
    /// Build the view. Temp basals are deduplicated by `mills`, stamped with
    /// `endmills` and sorted.
    pub fn new(
        profile_switches: Vec<Treatment>,
        temp_basals: Vec<Treatment>,
        combo_boluses: Vec<Treatment>,
    ) -> Self {
        let mut seen = HashSet::new();
        let mut temp_basals: Vec<Treatment> = temp_basals
            .into_iter()
            .filter(|t| seen.insert(t.mills))
            .collect();
        for t in &mut temp_basals {
            t.endmills = Some(t.end_mills());
        }
        temp_basals.sort_by_key(|t| t.mills);

        Self {
            profile_switches_hash: content_hash(&profile_switches),
            temp_basals_hash: content_hash(&temp_basals),
            combo_boluses_hash: content_hash(&combo_boluses),
            profile_switches,
            temp_basals,
            combo_boluses,
        }
    }

    fn same_content(&self, other: &ProfileTreatments) -> bool {
        self.profile_switches_hash == other.profile_switches_hash
            && self.temp_basals_hash == other.temp_basals_hash
            && self.combo_boluses_hash == other.combo_boluses_hash
    }
}

fn content_hash(items: &[Treatment]) -> String {
    let bytes = serde_json::to_vec(items).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

// ============================================================================
// Resolver
// ============================================================================

/// Percentage/time-shift override carried by the active profile switch.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CircadianOverride {
    pub percentage: f64,
    /// Hours
    pub timeshift: f64,
}

/// Effective basal at an instant, including temp basal and combo bolus parts.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TempBasalState {
    pub basal: f64,
    pub tempbasal: f64,
    pub combobolusbasal: f64,
    pub totalbasal: f64,
    pub treatment: Option<Treatment>,
    pub combobolustreatment: Option<Treatment>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ValueKey {
    minute: Mills,
    field: ProfileField,
    profile: String,
    percentage_bits: Option<u64>,
}

/// Profile store plus the treatment view, answering setting lookups.
///
/// Lookups are memoised per minute; the memo is cleared whenever profiles,
/// treatments or the fallback timezone change, so results never depend on it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProfileResolver {
    definitions: Vec<ProfileDefinition>,
    treatments: ProfileTreatments,
    /// Zone used when a profile declares none; the host's local zone if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fallback_timezone: Option<String>,
    #[serde(skip)]
    cache: RefCell<HashMap<ValueKey, Option<f64>>>,
}

impl ProfileResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback_timezone(mut self, zone: impl Into<String>) -> Self {
        self.set_fallback_timezone(Some(zone.into()));
        self
    }

    pub fn set_fallback_timezone(&mut self, zone: Option<String>) {
        if self.fallback_timezone != zone {
            self.fallback_timezone = zone;
            self.invalidate();
        }
    }

    pub fn has_data(&self) -> bool {
        !self.definitions.is_empty()
    }

    pub fn definitions(&self) -> &[ProfileDefinition] {
        &self.definitions
    }

    pub fn treatments(&self) -> &ProfileTreatments {
        &self.treatments
    }

    /// Replace the profile definitions from a raw payload.
    ///
    /// An empty payload leaves the resolver without profile data.
    pub fn load_profiles(&mut self, raw: &[Value]) {
        let mut definitions = convert_to_profile_store(raw);

        for definition in &mut definitions {
            for body in definition.store.values_mut() {
                annotate_body(body);
            }
            if let Some(mills) = definition.start_date.as_deref().and_then(parse_start_mills) {
                definition.mills = mills;
            }
        }
        definitions.sort_by(|a, b| b.mills.cmp(&a.mills));

        tracing::info!("Loaded {} profile definitions", definitions.len());
        self.definitions = definitions;
        self.sync_injected_profiles();
        self.invalidate();
    }

    /// Install a fresh treatment view.
    pub fn update_treatments(&mut self, view: ProfileTreatments) {
        let changed = !self.treatments.same_content(&view);
        self.treatments = view;
        if changed {
            tracing::debug!("Profile treatments changed, refreshing injected profiles");
            self.sync_injected_profiles();
            self.invalidate();
        }
    }

    /// Make every switch-embedded profile findable by name in the primary store.
    ///
    /// A switch whose named profile is missing from the store gets its
    /// `profileJson` parsed and stored as `name@@@@@mills`, so two switches
    /// reusing a name with different contents never collide.
    fn sync_injected_profiles(&mut self) {
        let Some(primary) = self.definitions.first_mut() else {
            return;
        };
        primary
            .store
            .retain(|name, _| !name.contains(INJECTED_PROFILE_MARKER));

        for switch in &self.treatments.profile_switches {
            let (Some(name), Some(json)) = (&switch.profile, &switch.profile_json) else {
                continue;
            };
            if primary.store.contains_key(name) {
                continue;
            }
            match serde_json::from_str::<ProfileBody>(json) {
                Ok(mut body) => {
                    annotate_body(&mut body);
                    primary.store.insert(injected_name(name, switch.mills), body);
                }
                Err(e) => tracing::warn!(
                    "Ignoring unreadable profileJson on switch to '{}' at {}: {}",
                    name,
                    switch.mills,
                    e
                ),
            }
        }
    }

    fn invalidate(&self) {
        self.cache.borrow_mut().clear();
    }

    /// The profile switch in force at `time`, if any.
    ///
    /// Switches older than the authoritative definition are ignored. A switch
    /// without a duration stays in force until a later one.
    pub fn active_treatment(&self, time: Mills) -> Option<&Treatment> {
        let primary = self.definitions.first()?;
        self.treatments
            .profile_switches
            .iter()
            .filter(|t| time >= t.mills && t.mills >= primary.mills)
            .filter(|t| {
                t.duration_ms() == 0 || time < t.end_mills()
            })
            .last()
    }

    /// Store key a switch resolves to.
    fn switch_profile_name(&self, switch: &Treatment) -> Option<String> {
        let name = switch.profile.as_deref()?;
        let store = &self.definitions.first()?.store;
        if switch.profile_json.is_some() && !store.contains_key(name) {
            Some(injected_name(name, switch.mills))
        } else {
            Some(name.to_string())
        }
    }

    /// Default profile name of the newest definition that started by `time`.
    pub fn profile_from_time(&self, time: Mills) -> Option<&str> {
        let first = self.definitions.first()?;
        let definition = self
            .definitions
            .iter()
            .find(|d| time >= d.mills)
            .unwrap_or(first);
        Some(definition.default_profile.as_str())
    }

    /// Name of the profile in force at `time`.
    pub fn active_profile_name(&self, time: Mills) -> Option<String> {
        let default_name = self.profile_from_time(time)?.to_string();
        let switched = self
            .active_treatment(time)
            .and_then(|t| self.switch_profile_name(t))
            .filter(|name| self.definitions[0].store.contains_key(name));
        Some(switched.unwrap_or(default_name))
    }

    pub fn resolve_named_profile(&self, time: Mills, explicit: Option<&str>) -> Option<String> {
        match explicit {
            Some(name) => Some(name.to_string()),
            None => self.active_profile_name(time),
        }
    }

    pub fn current_profile(&self, time: Mills, explicit: Option<&str>) -> Option<&ProfileBody> {
        let name = self.resolve_named_profile(time, explicit)?;
        self.definitions.first()?.store.get(&name)
    }

    /// Declared timezone of the profile in force at `time`.
    pub fn timezone(&self, time: Mills, explicit: Option<&str>) -> Option<String> {
        match self.current_profile(time, explicit)?.get("timezone")? {
            ProfileValue::Scalar(Value::String(zone)) if !zone.is_empty() => Some(zone.clone()),
            _ => None,
        }
    }

    /// Percentage/time-shift override of the switch in force at `time`.
    pub fn circadian_override_at(&self, time: Mills) -> Option<CircadianOverride> {
        let switch = self.active_treatment(time)?;
        let enabled = match switch.circadian_percentage_profile {
            Some(flag) => flag,
            None => switch.percentage.is_some() || switch.timeshift.is_some(),
        };
        enabled.then(|| CircadianOverride {
            percentage: switch.percentage.unwrap_or(100.0),
            timeshift: switch.timeshift.unwrap_or(0.0),
        })
    }

    /// Effective value of `field` at `time`.
    ///
    /// Without an explicit profile name, an active circadian override shifts
    /// `time` by `timeshift mod 24` hours and scales the result: basal by
    /// `percentage / 100`, sensitivity and carb ratio by its inverse. The
    /// shifted, minute-rounded time selects both the profile and the
    /// schedule entry. Returns `None` when no profile or value can be found.
    pub fn resolve_value(
        &self,
        time: Mills,
        field: ProfileField,
        explicit: Option<&str>,
    ) -> Option<f64> {
        let circadian = match explicit {
            Some(_) => None,
            None => self.circadian_override_at(time),
        };
        let shift_ms = circadian
            .map(|c| ((c.timeshift % 24.0) * MS_PER_HOUR as f64).round() as i64)
            .unwrap_or(0);
        let minute = round_to_minute(time.saturating_add(shift_ms));
        let profile = self.resolve_named_profile(minute, explicit)?;

        let key = ValueKey {
            minute,
            field,
            profile,
            percentage_bits: circadian.map(|c| c.percentage.to_bits()),
        };
        let cached = self.cache.borrow().get(&key).copied();
        if let Some(value) = cached {
            return value;
        }

        let value = self
            .lookup(minute, field, &key.profile)
            .map(|v| scale_for_override(v, field, circadian.map(|c| c.percentage)))
            .filter(|v| v.is_finite());

        let mut cache = self.cache.borrow_mut();
        if cache.len() >= CACHE_CAPACITY {
            cache.clear();
        }
        cache.insert(key, value);
        value
    }

    fn lookup(&self, time: Mills, field: ProfileField, profile: &str) -> Option<f64> {
        let body = self.definitions.first()?.store.get(profile)?;
        match body.get(field.key())? {
            ProfileValue::Scalar(value) => numeric(value),
            ProfileValue::Schedule(entries) => {
                let seconds = self.seconds_since_midnight(time, body)?;
                entries
                    .iter()
                    .filter(|e| e.seconds().is_some_and(|s| s <= seconds))
                    .last()
                    .and_then(|e| numeric(&e.value))
            }
        }
    }

    fn seconds_since_midnight(&self, time: Mills, body: &ProfileBody) -> Option<i64> {
        let declared = match body.get("timezone") {
            Some(ProfileValue::Scalar(Value::String(zone))) if !zone.is_empty() => {
                Some(zone.as_str())
            }
            _ => None,
        };

        for zone in [declared, self.fallback_timezone.as_deref()].into_iter().flatten() {
            match zone.parse::<Tz>() {
                Ok(tz) => return local_seconds(time, &tz),
                Err(_) => tracing::warn!("Unknown timezone '{}' in profile, falling back", zone),
            }
        }
        local_seconds(time, &Local)
    }

    pub fn basal(&self, time: Mills, explicit: Option<&str>) -> Option<f64> {
        self.resolve_value(time, ProfileField::Basal, explicit)
    }

    pub fn sens(&self, time: Mills, explicit: Option<&str>) -> Option<f64> {
        self.resolve_value(time, ProfileField::Sens, explicit)
    }

    pub fn carbratio(&self, time: Mills, explicit: Option<&str>) -> Option<f64> {
        self.resolve_value(time, ProfileField::CarbRatio, explicit)
    }

    pub fn target_low(&self, time: Mills, explicit: Option<&str>) -> Option<f64> {
        self.resolve_value(time, ProfileField::TargetLow, explicit)
    }

    pub fn target_high(&self, time: Mills, explicit: Option<&str>) -> Option<f64> {
        self.resolve_value(time, ProfileField::TargetHigh, explicit)
    }

    pub fn dia(&self, time: Mills, explicit: Option<&str>) -> Option<f64> {
        self.resolve_value(time, ProfileField::Dia, explicit)
    }

    /// True when sensitivity or either target cannot be resolved at `now`.
    pub fn profile_fields_missing(&self, now: Mills) -> bool {
        self.sens(now, None).is_none()
            || self.target_high(now, None).is_none()
            || self.target_low(now, None).is_none()
    }

    pub fn temp_basal_treatment_at(&self, time: Mills) -> Option<&Treatment> {
        self.treatments
            .temp_basals
            .iter()
            .filter(|t| {
                let end = t.endmills.unwrap_or_else(|| t.end_mills());
                time >= t.mills && time < end
            })
            .last()
    }

    pub fn combo_bolus_at(&self, time: Mills) -> Option<&Treatment> {
        self.treatments
            .combo_boluses
            .iter()
            .filter(|t| time >= t.mills && time < t.end_mills())
            .last()
    }

    /// Scheduled basal combined with any running temp basal and combo bolus.
    ///
    /// An absolute temp rate wins (so a temp of zero suspends delivery);
    /// otherwise a relative `percent` adjusts the scheduled rate.
    pub fn temp_basal_at(&self, time: Mills, explicit: Option<&str>) -> Option<TempBasalState> {
        let basal = self.basal(time, explicit)?;
        let treatment = self.temp_basal_treatment_at(time);
        let combo = self.combo_bolus_at(time);

        let tempbasal = match treatment {
            Some(t) => match (t.absolute, t.percent) {
                (Some(absolute), _) if !absolute.is_nan() && t.duration.unwrap_or(0.0) > 0.0 => {
                    absolute
                }
                (_, Some(percent)) if percent != 0.0 => basal * (100.0 + percent) / 100.0,
                _ => basal,
            },
            None => basal,
        };
        let combobolusbasal = combo.and_then(|c| c.relative).unwrap_or(0.0);

        Some(TempBasalState {
            basal,
            tempbasal,
            combobolusbasal,
            totalbasal: tempbasal + combobolusbasal,
            treatment: treatment.cloned(),
            combobolustreatment: combo.cloned(),
        })
    }

    /// Definitions without switch-injected profiles, for transmission.
    pub fn stripped_for_transport(&self) -> Vec<ProfileDefinition> {
        let mut definitions = self.definitions.clone();
        if let Some(primary) = definitions.first_mut() {
            primary
                .store
                .retain(|name, _| !name.contains(INJECTED_PROFILE_MARKER));
        }
        definitions
    }
}

fn scale_for_override(value: f64, field: ProfileField, percentage: Option<f64>) -> f64 {
    match (field, percentage) {
        (ProfileField::Sens | ProfileField::CarbRatio, Some(pct)) => value * 100.0 / pct,
        (ProfileField::Basal, Some(pct)) => value * pct / 100.0,
        _ => value,
    }
}
