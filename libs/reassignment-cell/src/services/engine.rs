use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use availability_cell::AvailabilityService;
use shared_config::AppConfig;
use waitlist_cell::{
    Appointment, EntryState, OfferDisposition, Slot, SlotState, WaitlistError, WaitlistStore,
};

use crate::error::ReassignmentError;
use crate::models::{EngineEvent, MatchOutcome, OfferResponse, RankedCandidate, SlotFreed};
use crate::services::events::EventSink;
use crate::services::matching::ConstraintMatcher;

/// Decides who gets a freed slot.
///
/// Every decision is committed through the store's compare-and-set
/// operations, so concurrent invocations (simultaneous cancellations,
/// simultaneous responses, the reaper) are safe to run in parallel; a lost
/// race shows up as a stale-state failure and triggers a re-snapshot, never
/// a half-applied assignment. Outbound events are published only after the
/// store transition has committed, and never while any lock is held.
pub struct ReassignmentEngine {
    store: Arc<WaitlistStore>,
    availability: Arc<AvailabilityService>,
    sink: Arc<dyn EventSink>,
    max_match_attempts: u32,
    offer_response_window: Duration,
    /// Entries that declined or let an offer lapse for a slot, so the
    /// re-match can move down the ranking instead of re-offering to the
    /// same patient. Cleared once the slot books.
    passed_offers: Mutex<HashMap<Uuid, HashSet<Uuid>>>,
}

impl ReassignmentEngine {
    pub fn new(
        store: Arc<WaitlistStore>,
        availability: Arc<AvailabilityService>,
        sink: Arc<dyn EventSink>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            availability,
            sink,
            max_match_attempts: config.max_match_attempts.max(1),
            offer_response_window: config.offer_response_window(),
            passed_offers: Mutex::new(HashMap::new()),
        }
    }

    /// A slot became bookable: record it and try to fill it.
    #[instrument(skip(self, event), fields(slot_id = %event.slot_id))]
    pub async fn handle_slot_freed(
        &self,
        event: SlotFreed,
        now: DateTime<Utc>,
    ) -> Result<MatchOutcome, ReassignmentError> {
        debug!("Slot freed ({:?})", event.reason);
        self.store.register_free_slot(slot_from_event(&event)).await?;
        self.match_slot(event.slot_id, now).await
    }

    /// Several slots freed together are resolved as one matching pass so a
    /// top-priority entry cannot absorb every slot: all feasible
    /// (slot, entry) pairs from a single snapshot are walked in descending
    /// global score order, and an entry leaves the pool the moment it is
    /// tentatively matched. Greedy by global priority is the intended
    /// policy; optimal weighted matching is not.
    #[instrument(skip(self, events), fields(batch = events.len()))]
    pub async fn handle_batch_freed(
        &self,
        events: Vec<SlotFreed>,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Uuid, MatchOutcome)>, ReassignmentError> {
        let mut slot_ids = Vec::new();
        for event in &events {
            if slot_ids.contains(&event.slot_id) {
                continue;
            }
            self.store.register_free_slot(slot_from_event(event)).await?;
            slot_ids.push(event.slot_id);
        }

        let availability = self.availability.snapshot().await;
        let waitlist = self.store.waitlist_snapshot().await;

        let mut pairs: Vec<(Slot, RankedCandidate)> = Vec::new();
        for slot_id in &slot_ids {
            let slot = self.store.slot(*slot_id).await?;
            if slot.state != SlotState::Free {
                continue;
            }
            let excluded = self.excluded_for(*slot_id).await;
            for candidate in ConstraintMatcher::candidates(&slot, &waitlist, &availability, now) {
                if excluded.contains(&candidate.entry.id) {
                    continue;
                }
                pairs.push((slot.clone(), candidate));
            }
        }

        // Global priority order; slot start then slot id break the tie when
        // one entry is feasible for several slots with the same score.
        pairs.sort_by(|a, b| {
            b.1.score
                .cmp(&a.1.score)
                .then(a.0.start.cmp(&b.0.start))
                .then(a.0.id.cmp(&b.0.id))
        });

        let mut matched: HashMap<Uuid, MatchOutcome> = HashMap::new();
        let mut taken_entries: HashSet<Uuid> = HashSet::new();
        for (slot, candidate) in pairs {
            if matched.contains_key(&slot.id) || taken_entries.contains(&candidate.entry.id) {
                continue;
            }
            let deadline = now + self.offer_response_window;
            match self
                .store
                .claim_offer(candidate.entry.id, slot.id, candidate.score.clone(), now, deadline)
                .await
            {
                Ok(appointment) => {
                    taken_entries.insert(candidate.entry.id);
                    self.emit(EngineEvent::OfferMade {
                        entry_id: appointment.entry_id,
                        slot_id: appointment.slot_id,
                        deadline: appointment.deadline,
                    })
                    .await;
                    matched.insert(slot.id, MatchOutcome::Matched { appointment });
                }
                Err(WaitlistError::StaleState { .. }) => {
                    // Someone raced the batch; the pair is simply skipped
                    // and the entities keep their current owners.
                    warn!(
                        "Batch pair (entry {}, slot {}) went stale; skipping",
                        candidate.entry.id, slot.id
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut outcomes = Vec::with_capacity(slot_ids.len());
        for slot_id in slot_ids {
            match matched.remove(&slot_id) {
                Some(outcome) => outcomes.push((slot_id, outcome)),
                None => {
                    // Silent when the slot left circulation mid-batch; a
                    // slot that is genuinely still open needs manual
                    // handling.
                    let still_free = self
                        .store
                        .slot(slot_id)
                        .await
                        .map(|s| s.state == SlotState::Free)
                        .unwrap_or(false);
                    if still_free {
                        self.emit(EngineEvent::NoMatch { slot_id }).await;
                    }
                    outcomes.push((slot_id, MatchOutcome::Unmatched));
                }
            }
        }
        Ok(outcomes)
    }

    /// One slot-assignment attempt: snapshot, rank, commit via
    /// compare-and-set. A stale commit re-snapshots and re-ranks, so a
    /// candidate is never skipped on the strength of an outdated ranking;
    /// when the retry bound is exhausted the attempt degrades to `NoMatch`.
    pub async fn match_slot(
        &self,
        slot_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<MatchOutcome, ReassignmentError> {
        for attempt in 1..=self.max_match_attempts {
            let slot = self.store.slot(slot_id).await?;
            if slot.state != SlotState::Free {
                // The slot was taken or withdrawn while we were getting
                // here; nothing to assign.
                debug!("Slot {} is {:?}, not matching", slot_id, slot.state);
                return Ok(MatchOutcome::Unmatched);
            }

            let availability = self.availability.snapshot().await;
            let waitlist = self.store.waitlist_snapshot().await;
            let excluded = self.excluded_for(slot_id).await;

            let top = ConstraintMatcher::candidates(&slot, &waitlist, &availability, now)
                .into_iter()
                .find(|candidate| !excluded.contains(&candidate.entry.id));

            let Some(candidate) = top else {
                self.emit(EngineEvent::NoMatch { slot_id }).await;
                return Ok(MatchOutcome::Unmatched);
            };

            let deadline = now + self.offer_response_window;
            match self
                .store
                .claim_offer(candidate.entry.id, slot_id, candidate.score.clone(), now, deadline)
                .await
            {
                Ok(appointment) => {
                    info!(
                        "Slot {} offered to entry {} (attempt {})",
                        slot_id, appointment.entry_id, attempt
                    );
                    self.emit(EngineEvent::OfferMade {
                        entry_id: appointment.entry_id,
                        slot_id: appointment.slot_id,
                        deadline: appointment.deadline,
                    })
                    .await;
                    return Ok(MatchOutcome::Matched { appointment });
                }
                Err(WaitlistError::StaleState { .. }) => {
                    warn!(
                        "Match attempt {}/{} for slot {} went stale, re-ranking",
                        attempt, self.max_match_attempts, slot_id
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(
            "Matching for slot {} exhausted {} attempts, leaving it for manual handling",
            slot_id, self.max_match_attempts
        );
        self.emit(EngineEvent::NoMatch { slot_id }).await;
        Ok(MatchOutcome::Unmatched)
    }

    /// The patient answered an offer (or the caller resolved it for them).
    #[instrument(skip(self, response), fields(entry_id = %response.entry_id, slot_id = %response.slot_id))]
    pub async fn handle_offer_response(
        &self,
        response: OfferResponse,
        now: DateTime<Utc>,
    ) -> Result<MatchOutcome, ReassignmentError> {
        if response.accepted {
            let appointment = self
                .store
                .confirm_offer(response.entry_id, response.slot_id, now)
                .await?;
            self.passed_offers.lock().await.remove(&response.slot_id);
            info!(
                "Appointment {} confirmed for patient {}",
                appointment.id, appointment.patient_id
            );
            self.emit(EngineEvent::AppointmentConfirmed {
                appointment_id: appointment.id,
                patient_id: appointment.patient_id,
                clinician_id: appointment.clinician_id,
                slot_id: appointment.slot_id,
            })
            .await;
            Ok(MatchOutcome::Matched { appointment })
        } else {
            let (_, entry) = self
                .store
                .release_offer(response.entry_id, response.slot_id, OfferDisposition::Declined)
                .await?;
            debug!("Entry {} declined slot {}", entry.id, response.slot_id);
            self.mark_passed(response.slot_id, entry.id).await;
            self.match_slot(response.slot_id, now).await
        }
    }

    /// A pending offer ran out its response window; treated as an implicit
    /// decline. The compare-and-set precondition makes losing to a
    /// late-arriving real response harmless.
    pub async fn handle_offer_timeout(
        &self,
        appointment: &Appointment,
        now: DateTime<Utc>,
    ) -> Result<MatchOutcome, ReassignmentError> {
        let (_, entry) = self
            .store
            .release_offer(appointment.entry_id, appointment.slot_id, OfferDisposition::Expired)
            .await?;
        if entry.state == EntryState::Expired {
            info!(
                "Entry {} exhausted its missed-offer allowance and now rests expired",
                entry.id
            );
        }
        self.mark_passed(appointment.slot_id, entry.id).await;
        self.match_slot(appointment.slot_id, now).await
    }

    async fn excluded_for(&self, slot_id: Uuid) -> HashSet<Uuid> {
        self.passed_offers
            .lock()
            .await
            .get(&slot_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn mark_passed(&self, slot_id: Uuid, entry_id: Uuid) {
        self.passed_offers
            .lock()
            .await
            .entry(slot_id)
            .or_default()
            .insert(entry_id);
    }

    /// Publish after commit. A sink failure is reported for manual
    /// follow-up; the committed transition stands either way, so a flaky
    /// messaging collaborator can never cause a duplicate offer.
    async fn emit(&self, event: EngineEvent) {
        if let Err(e) = self.sink.publish(event).await {
            error!("Failed to publish engine event: {}", e);
        }
    }
}

fn slot_from_event(event: &SlotFreed) -> Slot {
    Slot::free(event.slot_id, event.clinician_id, event.start, event.end)
}
