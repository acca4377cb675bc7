//! Overlap resolution for duration-bearing treatments.
//!
//! A treatment with a duration (temp basal, temporary target, timed profile
//! switch) ends early when another event starts inside its window. Events
//! without a duration are boundaries; duration-bearing events also cut each
//! other.

use crate::types::{Mills, Treatment, MS_PER_MINUTE};
use std::collections::HashSet;

/// Truncate overlapping durations.
///
/// Steps:
/// 1. Deduplicate by `mills` (first occurrence wins)
/// 2. Cut every duration-bearing treatment at every boundary event that
///    starts inside its window
/// 3. Cut duration-bearing treatments against every other treatment
/// 4. Unless `keep_zero_duration`, drop treatments whose duration is now zero
///
/// Cut durations are whole minutes rounded down, so a cut treatment never
/// extends past the event that cut it. The whole treatment set must be passed
/// in each time; re-resolving the output is a no-op.
pub fn resolve_durations(treatments: Vec<Treatment>, keep_zero_duration: bool) -> Vec<Treatment> {
    let mut seen = HashSet::new();
    let mut treatments: Vec<Treatment> = treatments
        .into_iter()
        .filter(|t| seen.insert(t.mills))
        .collect();

    let boundaries: Vec<usize> = (0..treatments.len())
        .filter(|&i| !treatments[i].has_duration())
        .collect();

    for base in 0..treatments.len() {
        if !treatments[base].has_duration() {
            continue;
        }
        for &end in &boundaries {
            cut_if_overlapping(&mut treatments, base, end);
        }
    }

    // Quadratic in the number of treatments; fine for day/week windows but
    // revisit if callers start passing months of history.
    for base in 0..treatments.len() {
        if !treatments[base].has_duration() {
            continue;
        }
        for end in 0..treatments.len() {
            cut_if_overlapping(&mut treatments, base, end);
        }
    }

    if keep_zero_duration {
        treatments
    } else {
        let before = treatments.len();
        treatments.retain(Treatment::has_duration);
        if treatments.len() < before {
            tracing::debug!(
                "Dropped {} treatments cut to zero duration",
                before - treatments.len()
            );
        }
        treatments
    }
}

/// Whole minutes between two instants, rounded down.
fn whole_minutes(ms: Mills) -> f64 {
    (ms / MS_PER_MINUTE) as f64
}

fn cut_if_overlapping(treatments: &mut [Treatment], base: usize, end: usize) {
    if base == end {
        return;
    }

    let end_mills = treatments[end].mills;
    let base_mills = treatments[base].mills;
    let base_end = treatments[base].end_mills();

    if base_mills < end_mills && base_end > end_mills {
        let cut = whole_minutes(end_mills - base_mills);
        tracing::trace!(
            "Cutting treatment at {} from {:?} to {} minutes (boundary {})",
            base_mills,
            treatments[base].duration,
            cut,
            end_mills
        );
        treatments[base].duration = Some(cut);

        if let Some(cutter) = treatments[end].profile.clone() {
            let cut_profile = treatments[base].profile.clone();
            treatments[base].cuttedby = Some(cutter);
            treatments[end].cutting = cut_profile;
        }
    }
}
