use chrono::{DateTime, Utc};
use uuid::Uuid;

use waitlist_cell::{Patient, PriorityScore, Slot, WaitlistEntry};

/// Computes the comparable priority of a waitlist entry for a slot.
///
/// Scoring is a pure function of the entry, the patient, the slot and the
/// supplied clock reading; recomputation with the same inputs always yields
/// the same score.
pub struct PriorityScorer;

impl PriorityScorer {
    pub fn score(
        entry: &WaitlistEntry,
        patient: &Patient,
        slot: &Slot,
        now: DateTime<Utc>,
    ) -> PriorityScore {
        PriorityScore {
            urgency_rank: entry.urgency.rank(),
            preference_rank: Self::preference_rank(patient, slot.clinician_id),
            waited_seconds: (now - entry.created_at).num_seconds().max(0),
            joined_at: entry.created_at,
            patient_id: entry.patient_id,
        }
    }

    /// Exact preferred-clinician match beats no preference. A patient whose
    /// stated preference excludes the clinician ranks below both, and is
    /// filtered out by the constraint matcher before scoring matters.
    pub fn preference_rank(patient: &Patient, clinician_id: Uuid) -> u8 {
        if patient.preferred_clinicians.is_empty() {
            1
        } else if patient.preferred_clinicians.contains(&clinician_id) {
            2
        } else {
            0
        }
    }
}
