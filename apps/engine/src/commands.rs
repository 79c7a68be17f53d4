use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use availability_cell::{AvailabilityService, ClinicianCalendar, TimeWindow};
use reassignment_cell::{MatchOutcome, OfferResponse, ReassignmentEngine, SlotFreed};
use waitlist_cell::{Patient, WaitlistStore};

/// One line of input: either an engine event proper or a registry update
/// that keeps the engine's world current.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum EngineCommand {
    SlotFreed(SlotFreed),
    BatchFreed { slots: Vec<SlotFreed> },
    OfferResponse(OfferResponse),
    CancelSlot { slot_id: Uuid },
    UpsertPatient(Patient),
    Enlist { patient_id: Uuid },
    Withdraw { entry_id: Uuid },
    UpsertCalendar(ClinicianCalendar),
    SetPatientWindows {
        patient_id: Uuid,
        windows: Vec<TimeWindow>,
    },
    AddClinicClosure { date: NaiveDate },
}

pub async fn dispatch(
    command: EngineCommand,
    engine: &Arc<ReassignmentEngine>,
    store: &Arc<WaitlistStore>,
    availability: &Arc<AvailabilityService>,
) -> anyhow::Result<()> {
    let now = Utc::now();
    match command {
        EngineCommand::SlotFreed(event) => {
            let slot_id = event.slot_id;
            let outcome = engine.handle_slot_freed(event, now).await?;
            info!("Slot {} resolved: {}", slot_id, outcome_label(&outcome));
        }
        EngineCommand::BatchFreed { slots } => {
            let outcomes = engine.handle_batch_freed(slots, now).await?;
            for (slot_id, outcome) in outcomes {
                info!("Slot {} resolved: {}", slot_id, outcome_label(&outcome));
            }
        }
        EngineCommand::OfferResponse(response) => {
            let outcome = engine.handle_offer_response(response, now).await?;
            info!("Offer response handled: {}", outcome_label(&outcome));
        }
        EngineCommand::CancelSlot { slot_id } => {
            store.cancel_slot(slot_id).await?;
            info!("Slot {} cancelled", slot_id);
        }
        EngineCommand::UpsertPatient(patient) => {
            let patient_id = patient.id;
            store.upsert_patient(patient).await;
            info!("Patient {} upserted", patient_id);
        }
        EngineCommand::Enlist { patient_id } => {
            let entry = store.enlist(patient_id, now).await?;
            info!("Patient {} enlisted as entry {}", patient_id, entry.id);
        }
        EngineCommand::Withdraw { entry_id } => {
            store.withdraw(entry_id).await?;
            info!("Entry {} withdrawn", entry_id);
        }
        EngineCommand::UpsertCalendar(calendar) => {
            let clinician_id = calendar.clinician_id;
            availability.upsert_calendar(calendar).await;
            info!("Calendar updated for clinician {}", clinician_id);
        }
        EngineCommand::SetPatientWindows {
            patient_id,
            windows,
        } => {
            availability.set_patient_windows(patient_id, windows).await;
            info!("Availability windows updated for patient {}", patient_id);
        }
        EngineCommand::AddClinicClosure { date } => {
            availability.add_clinic_closure(date).await;
            info!("Clinic closure added on {}", date);
        }
    }
    Ok(())
}

fn outcome_label(outcome: &MatchOutcome) -> &'static str {
    match outcome {
        MatchOutcome::Matched { .. } => "matched",
        MatchOutcome::Unmatched => "unmatched",
    }
}
