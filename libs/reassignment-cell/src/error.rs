use thiserror::Error;
use waitlist_cell::WaitlistError;

#[derive(Error, Debug)]
pub enum ReassignmentError {
    #[error(transparent)]
    Waitlist(#[from] WaitlistError),

    #[error("outbound event could not be published: {0}")]
    PublishError(String),
}

impl ReassignmentError {
    /// Whether the failure is a lost race that a caller may simply retry or
    /// drop, as opposed to a real fault.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            ReassignmentError::Waitlist(WaitlistError::StaleState { .. })
        )
    }
}
