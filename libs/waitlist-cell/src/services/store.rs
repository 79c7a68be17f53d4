use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::WaitlistError;
use crate::models::{
    Appointment, AppointmentStatus, EntryState, OfferDisposition, Patient, PriorityScore, Slot,
    SlotState, UrgencyLevel, WaitlistEntry, WaitlistView,
};

type Handle<T> = Arc<RwLock<T>>;

pub const DEFAULT_MAX_MISSED_OFFERS: u32 = 3;

/// The authoritative record of waitlist entries, slots and appointments.
///
/// Every mutation goes through a compare-and-set on the entity's current
/// state, so concurrent attempts racing on the same precondition serialize
/// with exactly one winner. Entities are locked individually; operations on
/// unrelated entries and slots never contend. Composite operations that
/// touch an entry and a slot together always lock the entry first, then the
/// slot, so they cannot deadlock against each other.
pub struct WaitlistStore {
    max_missed_offers: u32,
    patients: RwLock<HashMap<Uuid, Patient>>,
    entries: RwLock<HashMap<Uuid, Handle<WaitlistEntry>>>,
    slots: RwLock<HashMap<Uuid, Handle<Slot>>>,
    appointments: RwLock<HashMap<Uuid, Handle<Appointment>>>,
}

impl WaitlistStore {
    pub fn new(max_missed_offers: u32) -> Self {
        Self {
            max_missed_offers,
            patients: RwLock::new(HashMap::new()),
            entries: RwLock::new(HashMap::new()),
            slots: RwLock::new(HashMap::new()),
            appointments: RwLock::new(HashMap::new()),
        }
    }

    // Patient registry

    pub async fn upsert_patient(&self, patient: Patient) {
        self.patients.write().await.insert(patient.id, patient);
    }

    pub async fn patient(&self, patient_id: Uuid) -> Result<Patient, WaitlistError> {
        self.patients
            .read()
            .await
            .get(&patient_id)
            .cloned()
            .ok_or(WaitlistError::PatientNotFound(patient_id))
    }

    // Waitlist entry lifecycle

    /// Put a patient on the waitlist. The urgency tag is copied from the
    /// patient record at entry time. A patient may hold at most one open
    /// (active or offered) entry.
    pub async fn enlist(
        &self,
        patient_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<WaitlistEntry, WaitlistError> {
        let urgency = self.patient(patient_id).await?.urgency;

        let mut entries = self.entries.write().await;
        for handle in entries.values() {
            let existing = handle.read().await;
            if existing.patient_id == patient_id
                && matches!(existing.state, EntryState::Active | EntryState::Offered)
            {
                return Err(WaitlistError::AlreadyEnlisted(patient_id));
            }
        }

        let entry = WaitlistEntry::new(patient_id, urgency, now);
        entries.insert(entry.id, Arc::new(RwLock::new(entry.clone())));
        debug!("Patient {} enlisted as entry {}", patient_id, entry.id);
        Ok(entry)
    }

    /// The patient no longer wants the waitlist spot.
    pub async fn withdraw(&self, entry_id: Uuid) -> Result<WaitlistEntry, WaitlistError> {
        self.compare_and_transition(entry_id, EntryState::Active, EntryState::Withdrawn)
            .await
    }

    /// Bring an entry that ran out of missed offers back into the pool.
    pub async fn reactivate(&self, entry_id: Uuid) -> Result<WaitlistEntry, WaitlistError> {
        let handle = self.entry_handle(entry_id).await?;
        let mut entry = handle.write().await;
        if entry.state != EntryState::Expired {
            return Err(stale_entry(&entry, EntryState::Expired));
        }
        entry.state = EntryState::Active;
        entry.missed_offers = 0;
        Ok(entry.clone())
    }

    /// Refresh the urgency tag copied from the patient at entry time.
    pub async fn refresh_urgency(
        &self,
        entry_id: Uuid,
        urgency: UrgencyLevel,
    ) -> Result<WaitlistEntry, WaitlistError> {
        let handle = self.entry_handle(entry_id).await?;
        let mut entry = handle.write().await;
        if entry.state.is_terminal() {
            return Err(WaitlistError::InvalidTransition {
                entity: "entry",
                from: format!("{:?}", entry.state),
                to: format!("{:?}", entry.state),
            });
        }
        entry.urgency = urgency;
        Ok(entry.clone())
    }

    // Compare-and-set primitives

    pub async fn compare_and_transition(
        &self,
        entry_id: Uuid,
        expected: EntryState,
        new: EntryState,
    ) -> Result<WaitlistEntry, WaitlistError> {
        let handle = self.entry_handle(entry_id).await?;
        let mut entry = handle.write().await;
        if entry.state != expected {
            return Err(stale_entry(&entry, expected));
        }
        if !entry.state.can_transition_to(&new) {
            return Err(WaitlistError::InvalidTransition {
                entity: "entry",
                from: format!("{:?}", entry.state),
                to: format!("{:?}", new),
            });
        }
        entry.state = new;
        Ok(entry.clone())
    }

    pub async fn compare_and_transition_slot(
        &self,
        slot_id: Uuid,
        expected: SlotState,
        new: SlotState,
    ) -> Result<Slot, WaitlistError> {
        let handle = self.slot_handle(slot_id).await?;
        let mut slot = handle.write().await;
        if slot.state != expected {
            return Err(stale_slot(&slot, expected));
        }
        if !slot.state.can_transition_to(&new) {
            return Err(WaitlistError::InvalidTransition {
                entity: "slot",
                from: format!("{:?}", slot.state),
                to: format!("{:?}", new),
            });
        }
        slot.state = new;
        Ok(slot.clone())
    }

    // Slot registry

    /// Record a slot as free, creating it if the engine has not seen it
    /// before. Re-freeing a booked slot cancels its confirmed appointment;
    /// a held slot cannot be freed externally while its offer is pending.
    pub async fn register_free_slot(&self, slot: Slot) -> Result<Slot, WaitlistError> {
        if slot.start >= slot.end {
            return Err(WaitlistError::InvalidInterval {
                start: slot.start,
                end: slot.end,
            });
        }

        let existing = self.slots.read().await.get(&slot.id).cloned();
        match existing {
            None => {
                let mut slots = self.slots.write().await;
                let stored = Slot {
                    state: SlotState::Free,
                    ..slot
                };
                slots
                    .entry(stored.id)
                    .or_insert_with(|| Arc::new(RwLock::new(stored.clone())));
                Ok(stored)
            }
            Some(handle) => {
                let mut current = handle.write().await;
                if current.start != slot.start || current.end != slot.end {
                    warn!(
                        "Slot {} re-registered with a different interval; keeping the stored one",
                        slot.id
                    );
                }
                match current.state {
                    SlotState::Free => {}
                    SlotState::Booked => {
                        self.cancel_confirmed_appointment(current.id).await;
                        current.state = SlotState::Free;
                    }
                    SlotState::Cancelled => {
                        current.state = SlotState::Free;
                    }
                    SlotState::Held => {
                        return Err(stale_slot(&current, SlotState::Free));
                    }
                }
                Ok(current.clone())
            }
        }
    }

    /// Remove an open slot from circulation.
    pub async fn cancel_slot(&self, slot_id: Uuid) -> Result<Slot, WaitlistError> {
        self.compare_and_transition_slot(slot_id, SlotState::Free, SlotState::Cancelled)
            .await
    }

    // Reads

    pub async fn entry(&self, entry_id: Uuid) -> Result<WaitlistEntry, WaitlistError> {
        let handle = self.entry_handle(entry_id).await?;
        let entry = handle.read().await;
        Ok(entry.clone())
    }

    pub async fn slot(&self, slot_id: Uuid) -> Result<Slot, WaitlistError> {
        let handle = self.slot_handle(slot_id).await?;
        let slot = handle.read().await;
        Ok(slot.clone())
    }

    pub async fn appointment(&self, appointment_id: Uuid) -> Result<Appointment, WaitlistError> {
        let handle = self
            .appointments
            .read()
            .await
            .get(&appointment_id)
            .cloned()
            .ok_or(WaitlistError::AppointmentNotFound(appointment_id))?;
        let appointment = handle.read().await;
        Ok(appointment.clone())
    }

    /// A read-only view of the waitlist, each entry joined with its patient.
    /// Individual entries are read atomically; cross-entry skew is resolved
    /// by the compare-and-set at commit time.
    pub async fn waitlist_snapshot(&self) -> Vec<WaitlistView> {
        let patients = self.patients.read().await;
        let entries = self.entries.read().await;

        let mut views = Vec::with_capacity(entries.len());
        for handle in entries.values() {
            let entry = handle.read().await.clone();
            match patients.get(&entry.patient_id) {
                Some(patient) => views.push(WaitlistView {
                    entry,
                    patient: patient.clone(),
                }),
                None => warn!(
                    "Entry {} references unknown patient {}; skipping",
                    entry.id, entry.patient_id
                ),
            }
        }
        views
    }

    /// Pending offers whose response deadline has lapsed, oldest first.
    pub async fn expired_offers(&self, now: DateTime<Utc>) -> Vec<Appointment> {
        let appointments = self.appointments.read().await;
        let mut expired = Vec::new();
        for handle in appointments.values() {
            let appointment = handle.read().await;
            if appointment.status == AppointmentStatus::PendingConfirmation
                && appointment.deadline <= now
            {
                expired.push(appointment.clone());
            }
        }
        expired.sort_by(|a, b| a.deadline.cmp(&b.deadline));
        expired
    }

    /// Confirmed appointments for one clinician on one date, by start time.
    pub async fn clinician_schedule(&self, clinician_id: Uuid, day: NaiveDate) -> Vec<Appointment> {
        self.confirmed_where(|a| a.clinician_id == clinician_id && a.start.date_naive() == day)
            .await
    }

    /// All confirmed appointments for one patient, by start time.
    pub async fn patient_appointments(&self, patient_id: Uuid) -> Vec<Appointment> {
        self.confirmed_where(|a| a.patient_id == patient_id).await
    }

    // Composite atomics

    /// Offer a slot to a waitlist entry: entry `Active -> Offered` AND slot
    /// `Free -> Held`, plus a pending appointment, all or nothing. Fails
    /// with `StaleState` if either entity moved since the caller's snapshot.
    pub async fn claim_offer(
        &self,
        entry_id: Uuid,
        slot_id: Uuid,
        score: PriorityScore,
        now: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Result<Appointment, WaitlistError> {
        let entry_handle = self.entry_handle(entry_id).await?;
        let slot_handle = self.slot_handle(slot_id).await?;

        let mut entry = entry_handle.write().await;
        let mut slot = slot_handle.write().await;

        if entry.state != EntryState::Active {
            return Err(stale_entry(&entry, EntryState::Active));
        }
        if slot.state != SlotState::Free {
            return Err(stale_slot(&slot, SlotState::Free));
        }

        entry.state = EntryState::Offered;
        entry.last_offered_at = Some(now);
        slot.state = SlotState::Held;

        let appointment = Appointment::pending(&entry, &slot, score, now, deadline);
        self.appointments
            .write()
            .await
            .insert(appointment.id, Arc::new(RwLock::new(appointment.clone())));

        debug!(
            "Entry {} offered slot {} (deadline {})",
            entry_id, slot_id, deadline
        );
        Ok(appointment)
    }

    /// The patient accepted: entry `Offered -> Converted`, slot
    /// `Held -> Booked`, appointment confirmed.
    pub async fn confirm_offer(
        &self,
        entry_id: Uuid,
        slot_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Appointment, WaitlistError> {
        let entry_handle = self.entry_handle(entry_id).await?;
        let slot_handle = self.slot_handle(slot_id).await?;

        let mut entry = entry_handle.write().await;
        let mut slot = slot_handle.write().await;

        if entry.state != EntryState::Offered {
            return Err(stale_entry(&entry, EntryState::Offered));
        }
        if slot.state != SlotState::Held {
            return Err(stale_slot(&slot, SlotState::Held));
        }

        let pending = self.find_offer(entry_id, slot_id, true).await?;
        let mut appointment = pending.write().await;

        entry.state = EntryState::Converted;
        slot.state = SlotState::Booked;
        appointment.status = AppointmentStatus::Confirmed;
        appointment.confirmed_at = Some(now);

        debug!(
            "Appointment {} confirmed for patient {} on slot {}",
            appointment.id, appointment.patient_id, slot_id
        );
        Ok(appointment.clone())
    }

    /// The patient declined, or the offer lapsed: slot `Held -> Free`, the
    /// pending appointment is cancelled and the entry re-enters the pool
    /// with its original `created_at`. An entry that has exhausted its
    /// missed-offer allowance rests as `Expired` instead.
    pub async fn release_offer(
        &self,
        entry_id: Uuid,
        slot_id: Uuid,
        disposition: OfferDisposition,
    ) -> Result<(Appointment, WaitlistEntry), WaitlistError> {
        let entry_handle = self.entry_handle(entry_id).await?;
        let slot_handle = self.slot_handle(slot_id).await?;

        let mut entry = entry_handle.write().await;
        let mut slot = slot_handle.write().await;

        if entry.state != EntryState::Offered {
            return Err(stale_entry(&entry, EntryState::Offered));
        }
        if slot.state != SlotState::Held {
            return Err(stale_slot(&slot, SlotState::Held));
        }

        let pending = self.find_offer(entry_id, slot_id, false).await?;
        let mut appointment = pending.write().await;

        slot.state = SlotState::Free;
        appointment.status = AppointmentStatus::Cancelled;
        match disposition {
            OfferDisposition::Declined => {
                entry.state = EntryState::Active;
            }
            OfferDisposition::Expired => {
                entry.missed_offers += 1;
                entry.state = if entry.missed_offers >= self.max_missed_offers {
                    EntryState::Expired
                } else {
                    EntryState::Active
                };
            }
        }

        debug!(
            "Offer on slot {} released ({:?}); entry {} now {:?}",
            slot_id, disposition, entry_id, entry.state
        );
        Ok((appointment.clone(), entry.clone()))
    }

    // Private helpers

    async fn entry_handle(&self, entry_id: Uuid) -> Result<Handle<WaitlistEntry>, WaitlistError> {
        self.entries
            .read()
            .await
            .get(&entry_id)
            .cloned()
            .ok_or(WaitlistError::EntryNotFound(entry_id))
    }

    async fn slot_handle(&self, slot_id: Uuid) -> Result<Handle<Slot>, WaitlistError> {
        self.slots
            .read()
            .await
            .get(&slot_id)
            .cloned()
            .ok_or(WaitlistError::SlotNotFound(slot_id))
    }

    /// Locate the pending appointment for an entry/slot pair. When
    /// `check_invariant` is set, also verify that no other confirmed
    /// appointment exists for the slot; a booked slot with two confirmed
    /// appointments means the compare-and-set discipline was bypassed, and
    /// the store surfaces it rather than papering over it.
    async fn find_offer(
        &self,
        entry_id: Uuid,
        slot_id: Uuid,
        check_invariant: bool,
    ) -> Result<Handle<Appointment>, WaitlistError> {
        let appointments = self.appointments.read().await;
        let mut pending = None;
        for handle in appointments.values() {
            let appointment = handle.read().await;
            if appointment.slot_id != slot_id {
                continue;
            }
            if check_invariant && appointment.status == AppointmentStatus::Confirmed {
                return Err(WaitlistError::InvariantViolation(format!(
                    "slot {} already has confirmed appointment {}",
                    slot_id, appointment.id
                )));
            }
            if appointment.entry_id == entry_id
                && appointment.status == AppointmentStatus::PendingConfirmation
            {
                pending = Some(handle.clone());
            }
        }
        pending.ok_or(WaitlistError::OfferNotFound { entry_id, slot_id })
    }

    async fn cancel_confirmed_appointment(&self, slot_id: Uuid) {
        let appointments = self.appointments.read().await;
        for handle in appointments.values() {
            let mut appointment = handle.write().await;
            if appointment.slot_id == slot_id && appointment.status == AppointmentStatus::Confirmed
            {
                appointment.status = AppointmentStatus::Cancelled;
                debug!(
                    "Appointment {} cancelled because slot {} was freed",
                    appointment.id, slot_id
                );
            }
        }
    }

    async fn confirmed_where(&self, keep: impl Fn(&Appointment) -> bool) -> Vec<Appointment> {
        let appointments = self.appointments.read().await;
        let mut found = Vec::new();
        for handle in appointments.values() {
            let appointment = handle.read().await;
            if appointment.status == AppointmentStatus::Confirmed && keep(&appointment) {
                found.push(appointment.clone());
            }
        }
        found.sort_by(|a, b| a.start.cmp(&b.start));
        found
    }
}

impl Default for WaitlistStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MISSED_OFFERS)
    }
}

fn stale_entry(entry: &WaitlistEntry, expected: EntryState) -> WaitlistError {
    WaitlistError::StaleState {
        entity: "entry",
        expected: format!("{:?}", expected),
        actual: format!("{:?}", entry.state),
    }
}

fn stale_slot(slot: &Slot, expected: SlotState) -> WaitlistError {
    WaitlistError::StaleState {
        entity: "slot",
        expected: format!("{:?}", expected),
        actual: format!("{:?}", slot.state),
    }
}
