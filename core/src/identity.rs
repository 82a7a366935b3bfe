use std::sync::Arc;

use async_trait::async_trait;
use docstore::{DocumentStore, Update};
use parking_lot::RwLock;
use serde_json::{json, Value};

use crate::{
    docs,
    error::{RideError, Result},
    model::{User, UserId, USERS},
};

/// Index of lowercased usernames to the owning user id.
const USERNAMES: &str = "usernames";
/// Index of lowercased email addresses to the owning user id.
const EMAILS: &str = "emails";

/// Identity of the calling session.
pub trait Session: Send + Sync {
    fn current_user_id(&self) -> Option<UserId>;
}

/// Session whose identity is set explicitly (CLI flag, tests).
#[derive(Default)]
pub struct StaticSession {
    user: RwLock<Option<UserId>>,
}

impl StaticSession {
    pub fn new(user: Option<UserId>) -> Self {
        Self {
            user: RwLock::new(user),
        }
    }

    pub fn signed_in(user: impl Into<UserId>) -> Self {
        Self::new(Some(user.into()))
    }

    pub fn signed_out() -> Self {
        Self::new(None)
    }

    pub fn sign_in(&self, user: UserId) {
        *self.user.write() = Some(user);
    }

    pub fn sign_out(&self) {
        *self.user.write() = None;
    }
}

impl Session for StaticSession {
    fn current_user_id(&self) -> Option<UserId> {
        self.user.read().clone()
    }
}

/// Read access to user profiles.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Fails with [`RideError::NotFound`] for unknown ids.
    async fn get_user(&self, id: &UserId) -> Result<User>;
}

/// User profiles kept in the `users` collection of the document store.
#[derive(Clone)]
pub struct StoreUserDirectory {
    store: Arc<dyn DocumentStore>,
}

impl StoreUserDirectory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Create or replace a profile. Username and email must be unique
    /// (case-insensitive) across all other users.
    ///
    /// Uniqueness is enforced by claiming `usernames/{name}` and
    /// `emails/{address}` index documents transactionally before the profile
    /// is written.
    pub async fn save_user(&self, user: &User) -> Result<()> {
        if user.username.trim().is_empty() || user.email.trim().is_empty() {
            return Err(RideError::Invalid("username and email are required".into()));
        }
        if user.username.contains('/') || user.email.contains('/') {
            return Err(RideError::Invalid(
                "username and email must not contain '/'".into(),
            ));
        }
        let path = docs::path(USERS, user.id.as_str())?;
        let previous: Option<User> = docs::load(self.store.as_ref(), &path).await?;

        let username = self.claim(USERNAMES, &user.username, &user.id).await?;
        if username == Claim::Taken {
            return Err(RideError::Conflict("username already taken".into()));
        }
        let email = match self.claim(EMAILS, &user.email, &user.id).await {
            Ok(Claim::Taken) => Err(RideError::Conflict("email already registered".into())),
            other => other,
        };
        let email = match email {
            Ok(claim) => claim,
            Err(err) => {
                if username == Claim::New {
                    self.release(USERNAMES, &user.username, &user.id).await?;
                }
                return Err(err);
            }
        };

        if let Err(err) = self.store.write(&path, docs::encode(user)?).await {
            if username == Claim::New {
                self.release(USERNAMES, &user.username, &user.id).await?;
            }
            if email == Claim::New {
                self.release(EMAILS, &user.email, &user.id).await?;
            }
            return Err(err.into());
        }
        tracing::info!(user_id = %user.id, "user profile saved");

        if let Some(old) = previous {
            let renamed = [
                (USERNAMES, old.username, &user.username),
                (EMAILS, old.email, &user.email),
            ];
            for (index, old, new) in renamed {
                if old.eq_ignore_ascii_case(new) {
                    continue;
                }
                if let Err(err) = self.release(index, &old, &user.id).await {
                    tracing::warn!(user_id = %user.id, index, %err, "stale handle left claimed");
                }
            }
        }
        Ok(())
    }

    /// Claim `index/{handle}` for `id` unless another user holds it.
    async fn claim(&self, index: &str, handle: &str, id: &UserId) -> Result<Claim> {
        let path = docs::path(index, &handle.to_ascii_lowercase())?;
        let mut claim = Claim::Taken;
        self.store
            .transact(&path, &mut |current| {
                match current.and_then(|doc| doc.get("user_id")).and_then(Value::as_str) {
                    None => {
                        claim = Claim::New;
                        Update::Set(json!({ "user_id": id.as_str() }))
                    }
                    Some(owner) if owner == id.as_str() => {
                        claim = Claim::Held;
                        Update::Abort
                    }
                    Some(_) => {
                        claim = Claim::Taken;
                        Update::Abort
                    }
                }
            })
            .await?;
        Ok(claim)
    }

    /// Drop `index/{handle}` if `id` still owns it.
    async fn release(&self, index: &str, handle: &str, id: &UserId) -> Result<()> {
        let path = docs::path(index, &handle.to_ascii_lowercase())?;
        self.store
            .transact(&path, &mut |current| {
                let owner = current.and_then(|doc| doc.get("user_id")).and_then(Value::as_str);
                if owner == Some(id.as_str()) {
                    Update::Remove
                } else {
                    Update::Abort
                }
            })
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    /// Taken by this call.
    New,
    /// Already owned by the same user.
    Held,
    /// Owned by someone else.
    Taken,
}

#[async_trait]
impl UserDirectory for StoreUserDirectory {
    async fn get_user(&self, id: &UserId) -> Result<User> {
        let path = docs::path(USERS, id.as_str())?;
        docs::load(self.store.as_ref(), &path)
            .await?
            .ok_or(RideError::NotFound("user"))
    }
}
