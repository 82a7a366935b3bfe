use std::sync::Arc;

use docstore::DocumentStore;

use crate::{
    clock::Clock,
    error::{RideError, Result},
    identity::Session,
    model::UserId,
    retry::RetryPolicy,
};

/// Collaborators shared by every service. Cheap to clone.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn DocumentStore>,
    pub session: Arc<dyn Session>,
    pub clock: Arc<dyn Clock>,
    pub retry: RetryPolicy,
}

impl Context {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        session: Arc<dyn Session>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            session,
            clock,
            retry,
        }
    }

    /// Same collaborators acting as a different session.
    pub fn with_session(&self, session: Arc<dyn Session>) -> Self {
        Self {
            session,
            ..self.clone()
        }
    }

    pub(crate) fn caller(&self) -> Result<UserId> {
        self.session
            .current_user_id()
            .ok_or(RideError::Unauthenticated)
    }

    /// The caller, provided it is `user`.
    pub(crate) fn require_identity(&self, user: &UserId) -> Result<UserId> {
        let caller = self.caller()?;
        if &caller != user {
            return Err(RideError::Forbidden);
        }
        Ok(caller)
    }
}

#[cfg(test)]
impl Context {
    /// In-memory store, no signed-in user, fixed clock, no retry delay.
    pub(crate) fn for_tests() -> Self {
        use crate::{clock::FixedClock, identity::StaticSession};
        use time::macros::datetime;

        Self::new(
            Arc::new(docstore::MemoryStore::new()),
            Arc::new(StaticSession::signed_out()),
            Arc::new(FixedClock::new(datetime!(2024-02-01 12:00 UTC))),
            RetryPolicy::immediate(2),
        )
    }
}
