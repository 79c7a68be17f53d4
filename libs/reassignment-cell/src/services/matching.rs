use chrono::{DateTime, Utc};

use availability_cell::AvailabilitySnapshot;
use waitlist_cell::{EntryState, Slot, WaitlistView};

use crate::models::RankedCandidate;
use crate::services::scoring::PriorityScorer;

/// Filters the waitlist down to the entries that could take a slot and
/// ranks them by priority.
pub struct ConstraintMatcher;

impl ConstraintMatcher {
    /// Feasible candidates for the slot, best first.
    ///
    /// Keeps entries that are active, whose preference list (if any) names
    /// the slot's clinician, whose patient can attend the interval, and for
    /// which the clinician is actually working it. An empty result is a
    /// normal outcome, not an error. For a fixed snapshot and clock reading
    /// the output is deterministic: the score order is total, so no two
    /// candidates ever tie.
    pub fn candidates(
        slot: &Slot,
        waitlist: &[WaitlistView],
        availability: &AvailabilitySnapshot,
        now: DateTime<Utc>,
    ) -> Vec<RankedCandidate> {
        if !availability.is_working(slot.clinician_id, slot.start, slot.end) {
            return Vec::new();
        }

        let mut ranked: Vec<RankedCandidate> = waitlist
            .iter()
            .filter(|view| view.entry.state == EntryState::Active)
            .filter(|view| {
                view.patient.preferred_clinicians.is_empty()
                    || view.patient.preferred_clinicians.contains(&slot.clinician_id)
            })
            .filter(|view| availability.is_available(view.patient.id, slot.start, slot.end))
            .map(|view| RankedCandidate {
                score: PriorityScorer::score(&view.entry, &view.patient, slot, now),
                entry: view.entry.clone(),
                patient: view.patient.clone(),
            })
            .collect();

        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        ranked
    }
}
