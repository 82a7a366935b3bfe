use docstore::StoreError;
use thiserror::Error;

/// Failures surfaced by the ride services.
#[derive(Debug, Error)]
pub enum RideError {
    #[error("no signed-in user")]
    Unauthenticated,
    #[error("operation not permitted for this user")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("requested {requested} seats but only {available} available")]
    InsufficientSeats { requested: u32, available: u32 },
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transient store failure: {0}")]
    TransientStoreFailure(#[source] StoreError),
    /// A multi-record change was only partly applied and could not be undone.
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
    #[error("store failure: {0}")]
    Store(#[source] StoreError),
}

pub type Result<T, E = RideError> = std::result::Result<T, E>;

impl From<StoreError> for RideError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            RideError::TransientStoreFailure(err)
        } else {
            RideError::Store(err)
        }
    }
}

impl From<serde_json::Error> for RideError {
    fn from(err: serde_json::Error) -> Self {
        RideError::Store(StoreError::Corrupt(err))
    }
}

impl RideError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RideError::TransientStoreFailure(_))
    }

    /// Short text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            RideError::Unauthenticated => "Please sign in first.".into(),
            RideError::Forbidden => "You can't change someone else's ride.".into(),
            RideError::NotFound(what) => format!("That {what} no longer exists."),
            RideError::InsufficientSeats { available: 0, .. } => {
                "No seats left. Refresh and try again.".into()
            }
            RideError::InsufficientSeats { available: 1, .. } => {
                "Only 1 seat left. Refresh and try again.".into()
            }
            RideError::InsufficientSeats { available, .. } => {
                format!("Only {available} seats left. Refresh and try again.")
            }
            RideError::Invalid(reason) | RideError::Conflict(reason) => reason.clone(),
            RideError::TransientStoreFailure(_) => {
                "Network trouble. Please try again in a moment.".into()
            }
            RideError::InconsistentState(_) | RideError::Store(_) => {
                "Something went wrong. Please contact support.".into()
            }
        }
    }
}
