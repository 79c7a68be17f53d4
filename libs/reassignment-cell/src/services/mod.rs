pub mod engine;
pub mod events;
pub mod matching;
pub mod reaper;
pub mod scoring;

pub use engine::ReassignmentEngine;
pub use events::{ChannelEventSink, EventSink};
pub use matching::ConstraintMatcher;
pub use reaper::OfferReaper;
pub use scoring::PriorityScorer;
