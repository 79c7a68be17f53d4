use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A half-open interval of absolute time: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn is_well_formed(&self) -> bool {
        self.start < self.end
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && start < self.end
    }

    pub fn contains_span(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start <= start && end <= self.end
    }
}

/// Recurring working hours on one weekday (0 = Sunday, 6 = Saturday).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyHours {
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// A clinician's working-hours calendar.
///
/// Coverage is the union of the recurring weekly hours and any ad-hoc extra
/// windows; holiday windows subtract from that union.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicianCalendar {
    pub clinician_id: Uuid,
    pub weekly_hours: Vec<WeeklyHours>,
    pub extra_windows: Vec<TimeWindow>,
    pub holidays: Vec<TimeWindow>,
}

impl ClinicianCalendar {
    pub fn new(clinician_id: Uuid) -> Self {
        Self {
            clinician_id,
            weekly_hours: Vec::new(),
            extra_windows: Vec::new(),
            holidays: Vec::new(),
        }
    }
}
