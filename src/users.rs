//! User profile sync and plan management
//!
//! Profiles are owned by the external identity provider; this service applies
//! its out-of-band webhook events as idempotent upserts keyed by subject id.

use std::sync::Arc;
use tracing::info;

use crate::db::Db;
use crate::error::Result;
use crate::model::{Plan, User, UserId};

/// Profile fields delivered by identity webhook events
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

pub struct UserService {
    db: Arc<Db>,
}

impl UserService {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Create a user from an identity event, or return the existing one.
    /// Safe to replay: a duplicate create event is a no-op.
    pub fn upsert(&self, subject: &str, email: &str, profile: ProfileUpdate) -> Result<UserId> {
        if let Ok(existing) = self.db.get_user_by_subject(subject) {
            self.apply_profile(existing.id, profile)?;
            return Ok(existing.id);
        }

        let mut user = User::new(subject.to_string(), email.to_string());
        user.first_name = profile.first_name;
        user.last_name = profile.last_name;
        user.username = profile.username;
        user.avatar_url = profile.avatar_url;
        let id = self.db.insert_user(user);
        info!(subject, user_id = %id, "Created user from identity event");
        Ok(id)
    }

    /// Apply a profile update, leaving unset fields untouched
    pub fn apply_profile(&self, user_id: UserId, profile: ProfileUpdate) -> Result<()> {
        self.db.update_user(user_id, |user| {
            if let Some(email) = profile.email {
                user.email = email;
            }
            if let Some(first) = profile.first_name {
                user.first_name = Some(first);
            }
            if let Some(last) = profile.last_name {
                user.last_name = Some(last);
            }
            if let Some(username) = profile.username {
                user.username = Some(username);
            }
            if let Some(avatar) = profile.avatar_url {
                user.avatar_url = Some(avatar);
            }
            Ok(())
        })
    }

    /// Remove a user on an identity delete event. Job and artifact records
    /// stay behind as an audit trail.
    pub fn delete(&self, subject: &str) {
        if self.db.remove_user(subject).is_some() {
            info!(subject, "Deleted user from identity event");
        }
    }

    pub fn get_by_subject(&self, subject: &str) -> Result<User> {
        self.db.get_user_by_subject(subject)
    }

    /// Subscription change: resets the credit balance and storage quota to
    /// the new plan's grant
    pub fn update_plan(&self, user_id: UserId, plan: Plan) -> Result<()> {
        self.db.update_user(user_id, |user| {
            user.plan = plan;
            user.credits = plan.credit_grant();
            user.storage_quota_bytes = plan.storage_quota_bytes();
            Ok(())
        })
    }

    /// Explicit credit top-up
    pub fn grant_credits(&self, user_id: UserId, amount: u64) -> Result<u64> {
        self.db.update_user(user_id, |user| {
            user.credits += amount;
            Ok(user.credits)
        })
    }
}
