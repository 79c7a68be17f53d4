use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum WaitlistError {
    /// A compare-and-set precondition failed: the entity moved on since the
    /// caller last observed it. Always recoverable by re-snapshotting.
    #[error("stale {entity} state: expected {expected}, found {actual}")]
    StaleState {
        entity: &'static str,
        expected: String,
        actual: String,
    },

    #[error("invalid {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("waitlist entry not found: {0}")]
    EntryNotFound(Uuid),

    #[error("slot not found: {0}")]
    SlotNotFound(Uuid),

    #[error("patient not found: {0}")]
    PatientNotFound(Uuid),

    #[error("no pending offer for entry {entry_id} on slot {slot_id}")]
    OfferNotFound { entry_id: Uuid, slot_id: Uuid },

    #[error("appointment not found: {0}")]
    AppointmentNotFound(Uuid),

    #[error("patient {0} already has an open waitlist entry")]
    AlreadyEnlisted(Uuid),

    #[error("invalid slot interval: start {start} is not before end {end}")]
    InvalidInterval {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// A state the compare-and-set discipline is supposed to make
    /// unreachable. Surfaced for operator investigation, never corrected.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}
