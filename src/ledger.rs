//! Credit ledger: atomic per-user reserve and refund

use std::sync::Arc;
use tracing::{debug, info};

use crate::db::Db;
use crate::error::{AppError, Result};
use crate::model::UserId;

/// Tracks a user's available spend balance. Both operations run under the
/// user document's lock, so no two concurrent reservations can both succeed
/// past the balance.
pub struct CreditLedger {
    db: Arc<Db>,
}

impl CreditLedger {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Atomically check-and-debit. Fails with `InsufficientCredits` without
    /// mutating anything. Returns the remaining balance.
    pub fn reserve(&self, user_id: UserId, amount: u64) -> Result<u64> {
        let remaining = self.db.update_user(user_id, |user| {
            if user.credits < amount {
                return Err(AppError::InsufficientCredits {
                    required: amount,
                    available: user.credits,
                });
            }
            user.credits -= amount;
            Ok(user.credits)
        })?;
        debug!(user_id = %user_id, amount, remaining, "Reserved credits");
        Ok(remaining)
    }

    /// Atomically credit back. Idempotency is the caller's responsibility;
    /// the orchestrator refunds at most once per job via its guarded terminal
    /// transition. Returns the new balance.
    pub fn refund(&self, user_id: UserId, amount: u64) -> Result<u64> {
        let balance = self.db.update_user(user_id, |user| {
            user.credits += amount;
            Ok(user.credits)
        })?;
        info!(user_id = %user_id, amount, balance, "Refunded credits");
        Ok(balance)
    }
}
