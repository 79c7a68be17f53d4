use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::models::{ClinicianCalendar, TimeWindow};

#[derive(Debug, Clone, Default)]
struct AvailabilityData {
    calendars: HashMap<Uuid, ClinicianCalendar>,
    patient_windows: HashMap<Uuid, Vec<TimeWindow>>,
    clinic_closures: BTreeSet<NaiveDate>,
}

/// An immutable point-in-time view of all availability data.
///
/// Queries on a snapshot are pure and lock-free; mutations committed to the
/// owning service after the snapshot was taken are never visible through it.
#[derive(Debug, Clone)]
pub struct AvailabilitySnapshot {
    data: Arc<AvailabilityData>,
}

impl AvailabilitySnapshot {
    /// Whether the clinician is working for the whole of `[start, end)`.
    ///
    /// The span must lie inside the union of the calendar's recurring and
    /// ad-hoc windows (overlapping or adjacent windows are merged before the
    /// containment check) and must not touch a holiday or clinic closure.
    /// A clinician with no calendar on record is never working.
    pub fn is_working(&self, clinician_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        if start >= end {
            return false;
        }
        let Some(calendar) = self.data.calendars.get(&clinician_id) else {
            return false;
        };
        if self.overlaps_closure(start, end) {
            return false;
        }
        if calendar.holidays.iter().any(|h| h.overlaps(start, end)) {
            return false;
        }

        let windows = merge_windows(concrete_windows(calendar, start, end));
        covers(&windows, start, end)
    }

    /// Whether the patient can attend the whole of `[start, end)`.
    ///
    /// A patient with no recorded windows is unconstrained.
    pub fn is_available(&self, patient_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        if start >= end {
            return false;
        }
        match self.data.patient_windows.get(&patient_id) {
            None => true,
            Some(windows) if windows.is_empty() => true,
            Some(windows) => covers(&merge_windows(windows.clone()), start, end),
        }
    }

    fn overlaps_closure(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        let mut day = start.date_naive();
        // end is exclusive, so a span ending exactly at midnight does not
        // touch the following date.
        let last = (end - Duration::nanoseconds(1)).date_naive();
        while day <= last {
            if self.data.clinic_closures.contains(&day) {
                return true;
            }
            let Some(next) = day.succ_opt() else {
                return false;
            };
            day = next;
        }
        false
    }
}

/// Owns the mutable availability data and hands out read-only snapshots.
///
/// Mutators rebuild the data and swap the inner `Arc`, so they take effect
/// only for queries issued after the mutation commits; snapshots already
/// taken keep observing the old data.
pub struct AvailabilityService {
    inner: RwLock<Arc<AvailabilityData>>,
}

impl AvailabilityService {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(AvailabilityData::default())),
        }
    }

    pub async fn snapshot(&self) -> AvailabilitySnapshot {
        AvailabilitySnapshot {
            data: self.inner.read().await.clone(),
        }
    }

    pub async fn is_working(&self, clinician_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.snapshot().await.is_working(clinician_id, start, end)
    }

    pub async fn is_available(&self, patient_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.snapshot().await.is_available(patient_id, start, end)
    }

    /// Install or replace a clinician's calendar.
    pub async fn upsert_calendar(&self, calendar: ClinicianCalendar) {
        debug!("Updating calendar for clinician {}", calendar.clinician_id);
        self.mutate(|data| {
            data.calendars.insert(calendar.clinician_id, calendar);
        })
        .await;
    }

    /// Add a holiday window to an existing calendar. Returns false if the
    /// clinician has no calendar on record.
    pub async fn add_holiday(&self, clinician_id: Uuid, window: TimeWindow) -> bool {
        let mut guard = self.inner.write().await;
        let mut data = guard.as_ref().clone();
        let Some(calendar) = data.calendars.get_mut(&clinician_id) else {
            return false;
        };
        calendar.holidays.push(window);
        *guard = Arc::new(data);
        true
    }

    /// Replace a patient's availability windows.
    pub async fn set_patient_windows(&self, patient_id: Uuid, windows: Vec<TimeWindow>) {
        self.mutate(|data| {
            data.patient_windows.insert(patient_id, windows);
        })
        .await;
    }

    /// Mark a whole date as closed for every clinician.
    pub async fn add_clinic_closure(&self, date: NaiveDate) {
        debug!("Adding clinic closure on {}", date);
        self.mutate(|data| {
            data.clinic_closures.insert(date);
        })
        .await;
    }

    async fn mutate(&self, apply: impl FnOnce(&mut AvailabilityData)) {
        let mut guard = self.inner.write().await;
        let mut data = guard.as_ref().clone();
        apply(&mut data);
        *guard = Arc::new(data);
    }
}

impl Default for AvailabilityService {
    fn default() -> Self {
        Self::new()
    }
}

fn day_of_week(date: NaiveDate) -> i32 {
    match date.weekday() {
        Weekday::Sun => 0,
        Weekday::Mon => 1,
        Weekday::Tue => 2,
        Weekday::Wed => 3,
        Weekday::Thu => 4,
        Weekday::Fri => 5,
        Weekday::Sat => 6,
    }
}

/// Materialize the calendar's coverage windows for every date the span
/// touches: recurring weekly hours become concrete windows on each date,
/// joined by the ad-hoc extras.
fn concrete_windows(
    calendar: &ClinicianCalendar,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<TimeWindow> {
    let mut windows: Vec<TimeWindow> = calendar
        .extra_windows
        .iter()
        .copied()
        .filter(TimeWindow::is_well_formed)
        .collect();

    let mut day = start.date_naive();
    let last = (end - Duration::nanoseconds(1)).date_naive();
    while day <= last {
        let dow = day_of_week(day);
        for hours in &calendar.weekly_hours {
            if hours.day_of_week != dow || hours.start_time >= hours.end_time {
                continue;
            }
            windows.push(TimeWindow::new(
                day.and_time(hours.start_time).and_utc(),
                day.and_time(hours.end_time).and_utc(),
            ));
        }
        let Some(next) = day.succ_opt() else {
            break;
        };
        day = next;
    }

    windows
}

/// Merge overlapping and adjacent windows into a disjoint, sorted set.
fn merge_windows(mut windows: Vec<TimeWindow>) -> Vec<TimeWindow> {
    windows.retain(TimeWindow::is_well_formed);
    if windows.is_empty() {
        return windows;
    }
    windows.sort_by(|a, b| a.start.cmp(&b.start));

    let mut merged: Vec<TimeWindow> = Vec::with_capacity(windows.len());
    for window in windows {
        match merged.last_mut() {
            Some(last) if window.start <= last.end => {
                if window.end > last.end {
                    last.end = window.end;
                }
            }
            _ => merged.push(window),
        }
    }
    merged
}

fn covers(merged: &[TimeWindow], start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    merged.iter().any(|w| w.contains_span(start, end))
}
