//! Transition observers.
//!
//! Observers are notified after a transaction commits, outside the
//! per-mission exclusive section. They see the committed result only; a
//! rejected transaction produces no record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::coordinator::TransactionResult;
use crate::types::MissionId;

/// What an observer receives for one committed transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionRecord {
    /// Wire name of the transaction type, e.g. `complete_tool_step`.
    pub transaction: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mission_id: Option<MissionId>,
    pub result: TransactionResult,
    pub at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn new(
        transaction: &'static str,
        mission_id: Option<MissionId>,
        result: TransactionResult,
    ) -> Self {
        Self {
            transaction,
            mission_id,
            result,
            at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait TransitionObserver: Send + Sync {
    async fn on_transaction(&self, record: &TransactionRecord);
}

/// Discards every record. Useful as a default and in tests.
pub struct NoopObserver;

#[async_trait]
impl TransitionObserver for NoopObserver {
    async fn on_transaction(&self, _record: &TransactionRecord) {}
}

/// Logs each committed transaction at info level.
pub struct TracingObserver;

#[async_trait]
impl TransitionObserver for TracingObserver {
    async fn on_transaction(&self, record: &TransactionRecord) {
        info!(
            "[Observer] {} mission={} hop_completed={} mission_completed={}: {}",
            record.transaction,
            record.mission_id.as_deref().unwrap_or("-"),
            record.result.hop_completed,
            record.result.mission_completed,
            record.result.message
        );
    }
}
