//! Usage aggregator: per-(user, day) counters for generations and spend

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::db::Db;
use crate::model::{UsageRecord, UserId};

/// Outcome of a finished generation job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failure,
}

/// Sole writer of daily usage records. Counters are only ever created or
/// incremented, never overwritten wholesale.
pub struct UsageAggregator {
    db: Arc<Db>,
}

impl UsageAggregator {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Record a finished job against today's counters
    pub fn record(
        &self,
        user_id: UserId,
        outcome: JobOutcome,
        credits_charged: u64,
        model: &str,
    ) -> UsageRecord {
        self.record_on(user_id, Utc::now().date_naive(), outcome, credits_charged, model)
    }

    /// Record a finished job against a specific calendar date
    pub fn record_on(
        &self,
        user_id: UserId,
        date: NaiveDate,
        outcome: JobOutcome,
        credits_charged: u64,
        model: &str,
    ) -> UsageRecord {
        debug!(user_id = %user_id, %date, ?outcome, credits_charged, model, "Recording usage event");
        self.db.upsert_usage(user_id, date, |record| {
            record.generations += 1;
            match outcome {
                JobOutcome::Success => record.successes += 1,
                JobOutcome::Failure => record.failures += 1,
            }
            record.credits_spent += credits_charged;
            *record.model_usage.entry(model.to_string()).or_insert(0) += 1;
        })
    }

    pub fn daily(&self, user_id: UserId, date: NaiveDate) -> Option<UsageRecord> {
        self.db.get_usage(user_id, date)
    }
}
