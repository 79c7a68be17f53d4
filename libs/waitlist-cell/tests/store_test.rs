use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;

use waitlist_cell::{
    AppointmentStatus, EntryState, OfferDisposition, Patient, PriorityScore, Slot, SlotState,
    UrgencyLevel, WaitlistError, WaitlistStore,
};

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
}

fn patient(urgency: UrgencyLevel) -> Patient {
    Patient {
        id: Uuid::new_v4(),
        contact: json!({"email": "patient@example.com"}),
        preferred_clinicians: Vec::new(),
        urgency,
        joined_at: base(),
    }
}

fn slot(clinician_id: Uuid, offset_hours: i64) -> Slot {
    let start = base() + Duration::hours(offset_hours);
    Slot::free(Uuid::new_v4(), clinician_id, start, start + Duration::minutes(30))
}

fn score_for(patient: &Patient, created_at: DateTime<Utc>) -> PriorityScore {
    PriorityScore {
        urgency_rank: patient.urgency.rank(),
        preference_rank: 1,
        waited_seconds: 0,
        joined_at: created_at,
        patient_id: patient.id,
    }
}

async fn enlisted(store: &WaitlistStore, urgency: UrgencyLevel) -> (Patient, waitlist_cell::WaitlistEntry) {
    let patient = patient(urgency);
    store.upsert_patient(patient.clone()).await;
    let entry = store.enlist(patient.id, base()).await.expect("enlist failed");
    (patient, entry)
}

#[tokio::test]
async fn enlist_copies_urgency_and_rejects_duplicates() {
    let store = WaitlistStore::default();
    let (patient, entry) = enlisted(&store, UrgencyLevel::Urgent).await;

    assert_eq!(entry.urgency, UrgencyLevel::Urgent);
    assert_eq!(entry.state, EntryState::Active);
    assert_eq!(entry.created_at, base());

    let second = store.enlist(patient.id, base()).await;
    assert_matches!(second, Err(WaitlistError::AlreadyEnlisted(id)) if id == patient.id);
}

#[tokio::test]
async fn enlist_requires_known_patient() {
    let store = WaitlistStore::default();
    let result = store.enlist(Uuid::new_v4(), base()).await;
    assert_matches!(result, Err(WaitlistError::PatientNotFound(_)));
}

#[tokio::test]
async fn withdraw_frees_the_spot_for_reenlistment() {
    let store = WaitlistStore::default();
    let (patient, entry) = enlisted(&store, UrgencyLevel::Routine).await;

    let withdrawn = store.withdraw(entry.id).await.expect("withdraw failed");
    assert_eq!(withdrawn.state, EntryState::Withdrawn);

    // Withdrawing twice races against nothing; it is simply stale.
    assert_matches!(store.withdraw(entry.id).await, Err(WaitlistError::StaleState { .. }));

    // The patient can come back.
    let again = store.enlist(patient.id, base()).await;
    assert!(again.is_ok());
}

#[tokio::test]
async fn compare_and_transition_detects_staleness() {
    let store = WaitlistStore::default();
    let (_, entry) = enlisted(&store, UrgencyLevel::Routine).await;

    let offered = store
        .compare_and_transition(entry.id, EntryState::Active, EntryState::Offered)
        .await
        .expect("transition failed");
    assert_eq!(offered.state, EntryState::Offered);

    let stale = store
        .compare_and_transition(entry.id, EntryState::Active, EntryState::Offered)
        .await;
    assert_matches!(stale, Err(WaitlistError::StaleState { entity: "entry", .. }));
}

#[tokio::test]
async fn compare_and_transition_rejects_illegal_moves() {
    let store = WaitlistStore::default();
    let (_, entry) = enlisted(&store, UrgencyLevel::Routine).await;

    let illegal = store
        .compare_and_transition(entry.id, EntryState::Active, EntryState::Converted)
        .await;
    assert_matches!(illegal, Err(WaitlistError::InvalidTransition { entity: "entry", .. }));
}

#[tokio::test]
async fn claim_offer_moves_entry_and_slot_together() {
    let store = WaitlistStore::default();
    let (patient, entry) = enlisted(&store, UrgencyLevel::Routine).await;
    let slot = slot(Uuid::new_v4(), 1);
    store.register_free_slot(slot.clone()).await.expect("register failed");

    let deadline = base() + Duration::minutes(30);
    let appointment = store
        .claim_offer(entry.id, slot.id, score_for(&patient, entry.created_at), base(), deadline)
        .await
        .expect("claim failed");

    assert_eq!(appointment.status, AppointmentStatus::PendingConfirmation);
    assert_eq!(appointment.deadline, deadline);
    assert_eq!(appointment.start, slot.start);

    let entry = store.entry(entry.id).await.unwrap();
    assert_eq!(entry.state, EntryState::Offered);
    assert_eq!(entry.last_offered_at, Some(base()));
    assert_eq!(store.slot(slot.id).await.unwrap().state, SlotState::Held);
}

#[tokio::test]
async fn claim_offer_fails_when_slot_is_taken() {
    let store = WaitlistStore::default();
    let (p1, e1) = enlisted(&store, UrgencyLevel::Routine).await;
    let (p2, e2) = enlisted(&store, UrgencyLevel::Routine).await;
    let slot = slot(Uuid::new_v4(), 1);
    store.register_free_slot(slot.clone()).await.unwrap();

    let deadline = base() + Duration::minutes(30);
    store
        .claim_offer(e1.id, slot.id, score_for(&p1, e1.created_at), base(), deadline)
        .await
        .expect("first claim failed");

    let second = store
        .claim_offer(e2.id, slot.id, score_for(&p2, e2.created_at), base(), deadline)
        .await;
    assert_matches!(second, Err(WaitlistError::StaleState { entity: "slot", .. }));

    // The losing entry is untouched and still matchable.
    assert_eq!(store.entry(e2.id).await.unwrap().state, EntryState::Active);
}

#[tokio::test]
async fn racing_claims_have_exactly_one_winner() {
    let store = Arc::new(WaitlistStore::default());
    let (p1, e1) = enlisted(&store, UrgencyLevel::Routine).await;
    let (p2, e2) = enlisted(&store, UrgencyLevel::Routine).await;
    let slot = slot(Uuid::new_v4(), 1);
    store.register_free_slot(slot.clone()).await.unwrap();

    let deadline = base() + Duration::minutes(30);
    let first = {
        let store = store.clone();
        let score = score_for(&p1, e1.created_at);
        let slot_id = slot.id;
        tokio::spawn(async move { store.claim_offer(e1.id, slot_id, score, base(), deadline).await })
    };
    let second = {
        let store = store.clone();
        let score = score_for(&p2, e2.created_at);
        let slot_id = slot.id;
        tokio::spawn(async move { store.claim_offer(e2.id, slot_id, score, base(), deadline).await })
    };

    let outcomes = [first.await.unwrap(), second.await.unwrap()];
    let winners = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(winners, 1, "exactly one racing claim must win");
    assert_eq!(store.slot(slot.id).await.unwrap().state, SlotState::Held);
}

#[tokio::test]
async fn confirm_offer_books_the_slot() {
    let store = WaitlistStore::default();
    let (patient, entry) = enlisted(&store, UrgencyLevel::FollowUp).await;
    let slot = slot(Uuid::new_v4(), 1);
    store.register_free_slot(slot.clone()).await.unwrap();

    store
        .claim_offer(
            entry.id,
            slot.id,
            score_for(&patient, entry.created_at),
            base(),
            base() + Duration::minutes(30),
        )
        .await
        .unwrap();

    let confirmed_at = base() + Duration::minutes(5);
    let appointment = store
        .confirm_offer(entry.id, slot.id, confirmed_at)
        .await
        .expect("confirm failed");

    assert_eq!(appointment.status, AppointmentStatus::Confirmed);
    assert_eq!(appointment.confirmed_at, Some(confirmed_at));
    assert_eq!(store.entry(entry.id).await.unwrap().state, EntryState::Converted);
    assert_eq!(store.slot(slot.id).await.unwrap().state, SlotState::Booked);
}

#[tokio::test]
async fn declined_offer_restores_entry_with_original_join_timestamp() {
    let store = WaitlistStore::default();
    let (patient, entry) = enlisted(&store, UrgencyLevel::Routine).await;
    let slot = slot(Uuid::new_v4(), 1);
    store.register_free_slot(slot.clone()).await.unwrap();

    store
        .claim_offer(
            entry.id,
            slot.id,
            score_for(&patient, entry.created_at),
            base(),
            base() + Duration::minutes(30),
        )
        .await
        .unwrap();

    let (appointment, released) = store
        .release_offer(entry.id, slot.id, OfferDisposition::Declined)
        .await
        .expect("release failed");

    assert_eq!(appointment.status, AppointmentStatus::Cancelled);
    assert_eq!(released.state, EntryState::Active);
    assert_eq!(released.created_at, entry.created_at);
    assert_eq!(released.missed_offers, 0);
    assert_eq!(store.slot(slot.id).await.unwrap().state, SlotState::Free);
}

#[tokio::test]
async fn expired_offers_count_against_the_allowance() {
    let store = WaitlistStore::new(2);
    let (patient, entry) = enlisted(&store, UrgencyLevel::Routine).await;
    let slot = slot(Uuid::new_v4(), 1);
    store.register_free_slot(slot.clone()).await.unwrap();

    for round in 1..=2u32 {
        store
            .claim_offer(
                entry.id,
                slot.id,
                score_for(&patient, entry.created_at),
                base(),
                base() + Duration::minutes(30),
            )
            .await
            .expect("claim failed");
        let (_, released) = store
            .release_offer(entry.id, slot.id, OfferDisposition::Expired)
            .await
            .expect("release failed");
        assert_eq!(released.missed_offers, round);
        if round < 2 {
            assert_eq!(released.state, EntryState::Active);
        } else {
            assert_eq!(released.state, EntryState::Expired);
        }
    }

    // An operator can bring the entry back into the pool.
    let reactivated = store.reactivate(entry.id).await.expect("reactivate failed");
    assert_eq!(reactivated.state, EntryState::Active);
    assert_eq!(reactivated.missed_offers, 0);
}

#[tokio::test]
async fn expired_offers_are_listed_oldest_first() {
    let store = WaitlistStore::default();
    let clinician_id = Uuid::new_v4();
    let (p1, e1) = enlisted(&store, UrgencyLevel::Routine).await;
    let (p2, e2) = enlisted(&store, UrgencyLevel::Routine).await;
    let s1 = slot(clinician_id, 1);
    let s2 = slot(clinician_id, 2);
    store.register_free_slot(s1.clone()).await.unwrap();
    store.register_free_slot(s2.clone()).await.unwrap();

    store
        .claim_offer(e2.id, s2.id, score_for(&p2, e2.created_at), base(), base() + Duration::minutes(20))
        .await
        .unwrap();
    store
        .claim_offer(e1.id, s1.id, score_for(&p1, e1.created_at), base(), base() + Duration::minutes(10))
        .await
        .unwrap();

    let expired = store.expired_offers(base() + Duration::minutes(15)).await;
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].entry_id, e1.id);

    let expired = store.expired_offers(base() + Duration::minutes(25)).await;
    assert_eq!(expired.len(), 2);
    assert!(expired[0].deadline <= expired[1].deadline);
}

#[tokio::test]
async fn refreeing_a_booked_slot_cancels_its_appointment() {
    let store = WaitlistStore::default();
    let (patient, entry) = enlisted(&store, UrgencyLevel::Routine).await;
    let slot = slot(Uuid::new_v4(), 1);
    store.register_free_slot(slot.clone()).await.unwrap();

    let appointment = store
        .claim_offer(
            entry.id,
            slot.id,
            score_for(&patient, entry.created_at),
            base(),
            base() + Duration::minutes(30),
        )
        .await
        .unwrap();
    store.confirm_offer(entry.id, slot.id, base()).await.unwrap();

    // The patient cancels; the same interval opens up again.
    let refreed = store.register_free_slot(slot.clone()).await.expect("re-register failed");
    assert_eq!(refreed.state, SlotState::Free);
    assert_eq!(
        store.appointment(appointment.id).await.unwrap().status,
        AppointmentStatus::Cancelled
    );
}

#[tokio::test]
async fn held_slot_cannot_be_refreed_externally() {
    let store = WaitlistStore::default();
    let (patient, entry) = enlisted(&store, UrgencyLevel::Routine).await;
    let slot = slot(Uuid::new_v4(), 1);
    store.register_free_slot(slot.clone()).await.unwrap();
    store
        .claim_offer(
            entry.id,
            slot.id,
            score_for(&patient, entry.created_at),
            base(),
            base() + Duration::minutes(30),
        )
        .await
        .unwrap();

    let result = store.register_free_slot(slot.clone()).await;
    assert_matches!(result, Err(WaitlistError::StaleState { entity: "slot", .. }));
}

#[tokio::test]
async fn slot_with_inverted_interval_is_rejected() {
    let store = WaitlistStore::default();
    let bad = Slot::free(Uuid::new_v4(), Uuid::new_v4(), base(), base() - Duration::minutes(30));
    assert_matches!(
        store.register_free_slot(bad).await,
        Err(WaitlistError::InvalidInterval { .. })
    );
}

#[tokio::test]
async fn bypassing_the_composite_ops_surfaces_an_invariant_violation() {
    let store = WaitlistStore::default();
    let (p1, e1) = enlisted(&store, UrgencyLevel::Routine).await;
    let (p2, e2) = enlisted(&store, UrgencyLevel::Routine).await;
    let slot = slot(Uuid::new_v4(), 1);
    store.register_free_slot(slot.clone()).await.unwrap();

    store
        .claim_offer(e1.id, slot.id, score_for(&p1, e1.created_at), base(), base() + Duration::minutes(30))
        .await
        .unwrap();
    store.confirm_offer(e1.id, slot.id, base()).await.unwrap();

    // Raw per-entity transitions skip the appointment bookkeeping the
    // composite operations maintain.
    store
        .compare_and_transition_slot(slot.id, SlotState::Booked, SlotState::Free)
        .await
        .unwrap();
    store
        .claim_offer(e2.id, slot.id, score_for(&p2, e2.created_at), base(), base() + Duration::minutes(30))
        .await
        .unwrap();

    let violation = store.confirm_offer(e2.id, slot.id, base()).await;
    assert_matches!(violation, Err(WaitlistError::InvariantViolation(_)));
}

#[tokio::test]
async fn schedule_queries_return_confirmed_appointments_in_order() {
    let store = WaitlistStore::default();
    let clinician_id = Uuid::new_v4();
    let (p1, e1) = enlisted(&store, UrgencyLevel::Routine).await;
    let (p2, e2) = enlisted(&store, UrgencyLevel::Routine).await;

    let late = slot(clinician_id, 4);
    let early = slot(clinician_id, 1);
    store.register_free_slot(late.clone()).await.unwrap();
    store.register_free_slot(early.clone()).await.unwrap();

    store
        .claim_offer(e1.id, late.id, score_for(&p1, e1.created_at), base(), base() + Duration::minutes(30))
        .await
        .unwrap();
    store.confirm_offer(e1.id, late.id, base()).await.unwrap();
    store
        .claim_offer(e2.id, early.id, score_for(&p2, e2.created_at), base(), base() + Duration::minutes(30))
        .await
        .unwrap();
    store.confirm_offer(e2.id, early.id, base()).await.unwrap();

    let schedule = store.clinician_schedule(clinician_id, base().date_naive()).await;
    assert_eq!(schedule.len(), 2);
    assert_eq!(schedule[0].slot_id, early.id);
    assert_eq!(schedule[1].slot_id, late.id);

    let mine = store.patient_appointments(p1.id).await;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].slot_id, late.id);
}
