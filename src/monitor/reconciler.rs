//! Timestamp reconciliation for one poll
//!
//! Each instance keeps only its newest event. The next query window starts at
//! the oldest of those newest events: an instance whose events lag behind
//! holds the watermark back for everyone, but none of its events are skipped.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Result of reconciling one poll
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    /// Resource id -> timestamp of the event to publish
    pub selected: HashMap<String, DateTime<Utc>>,
    /// Inclusive start time for the next poll
    pub next_watermark: DateTime<Utc>,
}

/// Pick the newest timestamp per instance and the next watermark
///
/// The watermark is the minimum of the selected timestamps, never later than
/// `now`. When no instance reported anything it is `now`, so an idle feed
/// does not grow an unbounded query window.
pub fn reconcile<'a, I, T>(timestamps_by_instance: I, now: DateTime<Utc>) -> Reconciled
where
    I: IntoIterator<Item = (&'a String, T)>,
    T: IntoIterator<Item = &'a DateTime<Utc>>,
{
    let mut next_watermark = now;
    let mut selected = HashMap::new();

    for (resource_id, timestamps) in timestamps_by_instance {
        let Some(newest) = timestamps.into_iter().max().copied() else {
            continue;
        };

        selected.insert(resource_id.clone(), newest);
        next_watermark = next_watermark.min(newest);
    }

    Reconciled {
        selected,
        next_watermark,
    }
}
