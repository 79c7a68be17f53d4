use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use waitlist_cell::{Appointment, Patient, PriorityScore, WaitlistEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreedReason {
    Cancellation,
    NoShow,
    NewOpening,
}

/// Inbound: a clinician time interval became bookable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotFreed {
    pub slot_id: Uuid,
    pub clinician_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub reason: FreedReason,
}

/// Inbound: the patient answered (or the caller resolved) a pending offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferResponse {
    pub entry_id: Uuid,
    pub slot_id: Uuid,
    pub accepted: bool,
}

/// Outbound events, consumed by the messaging collaborator and the
/// staff-facing surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    OfferMade {
        entry_id: Uuid,
        slot_id: Uuid,
        deadline: DateTime<Utc>,
    },
    AppointmentConfirmed {
        appointment_id: Uuid,
        patient_id: Uuid,
        clinician_id: Uuid,
        slot_id: Uuid,
    },
    /// Nobody on the waitlist fits the slot; it needs manual handling.
    NoMatch { slot_id: Uuid },
}

/// One feasible entry for a slot, carrying the score it was ranked with.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub entry: WaitlistEntry,
    pub patient: Patient,
    pub score: PriorityScore,
}

/// Terminal result of one slot-assignment attempt.
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Matched { appointment: Appointment },
    Unmatched,
}

impl MatchOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }
}
