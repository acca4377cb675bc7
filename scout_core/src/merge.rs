//! Snapshot reconciliation.
//!
//! Two delta contracts are supported:
//! - Timestamp-keyed streams (readings, device status): a record is the same
//!   record if it shares `mills` with one already cached.
//! - Identity-keyed streams (treatments, food): records carry an `_id` and an
//!   optional `action` of `update` or `remove`.
//!
//! In both cases a missing payload means "no update" and a non-delta payload
//! replaces the cache wholesale.

use crate::types::{Identified, MergeAction, Mills, Timestamped};
use std::collections::HashSet;

/// Retention applied to cached timestamp-keyed data when no explicit age is given.
pub const DEFAULT_MAX_AGE_MS: i64 = 2 * 24 * 60 * 60 * 1000;

/// Merge a timestamp-keyed stream.
///
/// On delta updates, cached entries at or below `now - max_age_ms` are pruned
/// before the received entries are folded in. A received entry is appended
/// only if no retained entry (or earlier received entry) has the same
/// `mills`; the result is sorted ascending by `mills`.
pub fn merge_timestamped<T: Timestamped>(
    is_delta: bool,
    cached: Vec<T>,
    received: Option<Vec<T>>,
    now: Mills,
    max_age_ms: Option<i64>,
) -> Vec<T> {
    let Some(received) = received else {
        return cached;
    };

    if !is_delta {
        return full_replace(received);
    }

    let horizon = now - max_age_ms.unwrap_or(DEFAULT_MAX_AGE_MS);
    let before = cached.len();
    let mut merged: Vec<T> = cached.into_iter().filter(|e| e.mills() > horizon).collect();
    if merged.len() < before {
        tracing::debug!(
            "Pruned {} cached records at or below {}",
            before - merged.len(),
            horizon
        );
    }

    let mut seen: HashSet<Mills> = merged.iter().map(Timestamped::mills).collect();
    let mut added = 0;
    for entry in received {
        if seen.insert(entry.mills()) {
            merged.push(entry);
            added += 1;
        }
    }

    merged.sort_by_key(Timestamped::mills);
    tracing::debug!("Delta merge added {} records ({} total)", added, merged.len());
    merged
}

/// Merge an identity-keyed stream.
///
/// Delta records without an action are inserted; a record whose `_id` is
/// already cached replaces it so identities stay unique. `remove` deletes the
/// cached record with the same `_id`, `update` replaces it in place with the
/// action stripped. Actions that reference an unknown `_id` are ignored.
pub fn merge_identified<T: Identified>(
    is_delta: bool,
    mut cached: Vec<T>,
    received: Option<Vec<T>>,
) -> Vec<T> {
    let Some(received) = received else {
        return cached;
    };

    if !is_delta {
        return full_replace(received);
    }

    for mut record in received {
        let position = record
            .record_id()
            .and_then(|id| cached.iter().position(|c| c.record_id() == Some(id)));

        match (record.action().cloned(), position) {
            (None, Some(idx)) => cached[idx] = record,
            (None, None) => cached.push(record),
            (Some(MergeAction::Remove), Some(idx)) => {
                cached.remove(idx);
            }
            (Some(MergeAction::Update), Some(idx)) => {
                record.clear_action();
                cached[idx] = record;
            }
            (Some(action), None) => {
                tracing::debug!(
                    "Ignoring {:?} for unknown record {:?}",
                    action,
                    record.record_id().map(ToString::to_string)
                );
            }
            (Some(MergeAction::Unknown), Some(_)) => {
                tracing::warn!("Ignoring unrecognised delta action");
            }
        }
    }

    cached.sort_by_key(Timestamped::mills);
    cached
}

/// A non-delta payload becomes the cache, ordered ascending by `mills`.
/// The sort is stable, so records sharing a timestamp keep their order.
fn full_replace<T: Timestamped>(mut received: Vec<T>) -> Vec<T> {
    tracing::debug!("Full replace with {} records", received.len());
    received.sort_by_key(Timestamped::mills);
    received
}
