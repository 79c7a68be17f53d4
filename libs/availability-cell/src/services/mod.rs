pub mod schedule;

pub use schedule::{AvailabilityService, AvailabilitySnapshot};
