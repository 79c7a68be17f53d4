use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Routine,
    FollowUp,
    Urgent,
}

impl UrgencyLevel {
    pub fn rank(&self) -> u8 {
        match self {
            UrgencyLevel::Routine => 0,
            UrgencyLevel::FollowUp => 1,
            UrgencyLevel::Urgent => 2,
        }
    }
}

/// A patient as the engine sees them. Contact details are opaque; the
/// engine only routes them through to the messaging collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub contact: Value,
    /// Empty list means no preference.
    pub preferred_clinicians: Vec<Uuid>,
    pub urgency: UrgencyLevel,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Free,
    Held,
    Booked,
    Cancelled,
}

impl SlotState {
    pub fn can_transition_to(&self, target: &SlotState) -> bool {
        use SlotState::*;
        matches!(
            (self, target),
            (Free, Held)
                | (Free, Cancelled)
                | (Held, Free)
                | (Held, Booked)
                | (Booked, Free)
                | (Booked, Cancelled)
                | (Cancelled, Free)
        )
    }
}

/// A bookable clinician time interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub id: Uuid,
    pub clinician_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub state: SlotState,
}

impl Slot {
    pub fn free(id: Uuid, clinician_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            id,
            clinician_id,
            start,
            end,
            state: SlotState::Free,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Active,
    Offered,
    Expired,
    Withdrawn,
    Converted,
}

impl EntryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryState::Withdrawn | EntryState::Converted)
    }

    pub fn can_transition_to(&self, target: &EntryState) -> bool {
        use EntryState::*;
        matches!(
            (self, target),
            (Active, Offered)
                | (Active, Withdrawn)
                | (Offered, Converted)
                | (Offered, Active)
                | (Offered, Expired)
                | (Expired, Active)
        )
    }
}

/// A patient's standing request for an earlier or any appointment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Uuid,
    pub patient_id: Uuid,
    /// Fairness baseline. Never changes after creation.
    pub created_at: DateTime<Utc>,
    pub last_offered_at: Option<DateTime<Utc>>,
    pub urgency: UrgencyLevel,
    /// Offers that lapsed without any response from the patient.
    pub missed_offers: u32,
    pub state: EntryState,
}

impl WaitlistEntry {
    pub fn new(patient_id: Uuid, urgency: UrgencyLevel, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            created_at: now,
            last_offered_at: None,
            urgency,
            missed_offers: 0,
            state: EntryState::Active,
        }
    }
}

/// Priority of a waitlist entry for a particular slot at a particular time.
///
/// Ordering is strictly lexicographic across the tiers so no tier can ever
/// be traded against another: urgency, then clinician-preference match, then
/// time waited, then earliest join, then lowest patient identifier. The last
/// two tiers make the order total; `Ordering::Greater` means offered first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityScore {
    pub urgency_rank: u8,
    pub preference_rank: u8,
    pub waited_seconds: i64,
    pub joined_at: DateTime<Utc>,
    pub patient_id: Uuid,
}

impl Ord for PriorityScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.urgency_rank
            .cmp(&other.urgency_rank)
            .then(self.preference_rank.cmp(&other.preference_rank))
            .then(self.waited_seconds.cmp(&other.waited_seconds))
            .then(other.joined_at.cmp(&self.joined_at))
            .then(other.patient_id.cmp(&self.patient_id))
    }
}

impl PartialOrd for PriorityScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    PendingConfirmation,
    Confirmed,
    Cancelled,
}

/// Produced when a waitlist entry is matched to a slot. Records the score
/// the entry won with, for auditability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub patient_id: Uuid,
    pub clinician_id: Uuid,
    pub slot_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub score: PriorityScore,
    pub status: AppointmentStatus,
    pub offered_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Appointment {
    pub fn pending(
        entry: &WaitlistEntry,
        slot: &Slot,
        score: PriorityScore,
        now: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entry_id: entry.id,
            patient_id: entry.patient_id,
            clinician_id: slot.clinician_id,
            slot_id: slot.id,
            start: slot.start,
            end: slot.end,
            score,
            status: AppointmentStatus::PendingConfirmation,
            offered_at: now,
            deadline,
            confirmed_at: None,
        }
    }
}

/// How a pending offer was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDisposition {
    Declined,
    Expired,
}

/// One waitlist entry joined with its patient, as read from a store
/// snapshot.
#[derive(Debug, Clone)]
pub struct WaitlistView {
    pub entry: WaitlistEntry,
    pub patient: Patient,
}
