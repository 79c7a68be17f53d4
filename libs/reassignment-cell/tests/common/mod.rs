#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use availability_cell::{AvailabilityService, ClinicianCalendar, WeeklyHours};
use reassignment_cell::{
    ChannelEventSink, EngineEvent, FreedReason, ReassignmentEngine, SlotFreed,
};
use shared_config::AppConfig;
use waitlist_cell::{Patient, UrgencyLevel, WaitlistEntry, WaitlistStore};

pub fn test_config() -> AppConfig {
    AppConfig {
        offer_response_window_minutes: 30,
        max_match_attempts: 3,
        max_missed_offers: 3,
        reaper_interval_seconds: 60,
    }
}

// 2025-06-02 is a Monday.
pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, h, m, 0).unwrap()
}

pub fn days_before(reference: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    reference - Duration::days(days)
}

pub struct EngineHarness {
    pub store: Arc<WaitlistStore>,
    pub availability: Arc<AvailabilityService>,
    pub engine: Arc<ReassignmentEngine>,
    pub events: UnboundedReceiver<EngineEvent>,
}

impl EngineHarness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(WaitlistStore::new(config.max_missed_offers));
        let availability = Arc::new(AvailabilityService::new());
        let (sink, events) = ChannelEventSink::channel();
        let engine = Arc::new(ReassignmentEngine::new(
            store.clone(),
            availability.clone(),
            Arc::new(sink),
            &config,
        ));
        Self {
            store,
            availability,
            engine,
            events,
        }
    }

    /// Register a clinician working every day, 08:00-18:00.
    pub async fn open_clinician(&self, clinician_id: Uuid) {
        let weekly_hours = (0..7)
            .map(|day_of_week| WeeklyHours {
                day_of_week,
                start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            })
            .collect();
        self.availability
            .upsert_calendar(ClinicianCalendar {
                clinician_id,
                weekly_hours,
                extra_windows: Vec::new(),
                holidays: Vec::new(),
            })
            .await;
    }

    pub async fn add_patient(
        &self,
        urgency: UrgencyLevel,
        preferred_clinicians: Vec<Uuid>,
        joined_at: DateTime<Utc>,
    ) -> Patient {
        let patient = Patient {
            id: Uuid::new_v4(),
            contact: json!({"email": "patient@example.com"}),
            preferred_clinicians,
            urgency,
            joined_at,
        };
        self.store.upsert_patient(patient.clone()).await;
        patient
    }

    pub async fn enlist(&self, patient: &Patient) -> WaitlistEntry {
        self.store
            .enlist(patient.id, patient.joined_at)
            .await
            .expect("enlist failed")
    }

    pub fn slot_freed(
        &self,
        slot_id: Uuid,
        clinician_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SlotFreed {
        SlotFreed {
            slot_id,
            clinician_id,
            start,
            end,
            reason: FreedReason::Cancellation,
        }
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}
