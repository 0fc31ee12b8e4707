//! Relevance selection: which windowed notification should fire now.
//!
//! Pure functions, no I/O. When several candidates are relevant at once
//! (typically after missed runs) the most advanced one wins and the earlier
//! ones are superseded.

use chrono::{DateTime, Duration, Utc};
use tiernotify_core::types::TrialWindow;

use crate::catalog::NotificationDefinition;

/// A candidate is relevant when its trigger date has been reached, lies
/// strictly after the last send, and is not older than its max age.
pub fn is_relevant(
    definition: &NotificationDefinition,
    window: &TrialWindow,
    now: DateTime<Utc>,
    last_sent: Option<DateTime<Utc>>,
) -> bool {
    let Some(trigger) = definition.trigger_date(window) else {
        return false;
    };
    if trigger > now {
        return false;
    }
    if last_sent.is_some_and(|sent| trigger <= sent) {
        return false;
    }
    if definition.max_age_days < 0 {
        return true;
    }
    // A cutoff before the earliest representable instant excludes nothing.
    match Duration::try_days(definition.max_age_days).and_then(|age| now.checked_sub_signed(age)) {
        Some(cutoff) => trigger >= cutoff,
        None => true,
    }
}

/// Indices of every relevant candidate, ascending.
pub fn relevant_candidates(
    window: &TrialWindow,
    candidates: &[NotificationDefinition],
    now: DateTime<Utc>,
    last_sent: Option<DateTime<Utc>>,
) -> Vec<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, def)| is_relevant(def, window, now, last_sent))
        .map(|(idx, _)| idx)
        .collect()
}

/// The highest-index relevant candidate, if any.
pub fn select_notification(
    window: &TrialWindow,
    candidates: &[NotificationDefinition],
    now: DateTime<Utc>,
    last_sent: Option<DateTime<Utc>>,
) -> Option<usize> {
    relevant_candidates(window, candidates, now, last_sent)
        .last()
        .copied()
}
