use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use santa_core::{mask_code, Assignment, DrawingId, Participant, RedemptionCode, CODE_PREFIX};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::record::StoredRecord;
use crate::store::{KvStore, Scope, StoreError};

/// Linear backoff: the wait after attempt `n` is `n * base_delay`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct DrawingReport {
    pub drawing_id: DrawingId,
    pub saved: Vec<RedemptionCode>,
    pub failed_givers: Vec<Participant>,
}

impl DrawingReport {
    pub fn is_complete(&self) -> bool {
        self.failed_givers.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub failed: usize,
}

/// Shared-namespace access for redemption codes, with retries on write.
#[derive(Clone)]
pub struct StoreAdapter {
    store: Arc<dyn KvStore>,
    policy: RetryPolicy,
}

impl StoreAdapter {
    pub fn new(store: Arc<dyn KvStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn save_with_retry(
        &self,
        code: &RedemptionCode,
        record: &StoredRecord,
        max_retries: u32,
    ) -> bool {
        let value = match serde_json::to_string(record) {
            Ok(value) => value,
            Err(err) => {
                error!(code = %code.masked(), error = %err, "could not encode record");
                return false;
            }
        };

        for attempt in 1..=max_retries {
            match self.store.set(code.as_str(), &value, Scope::Shared).await {
                Ok(true) => return true,
                Ok(false) => warn!(code = %code.masked(), attempt, max_retries, "store declined write"),
                Err(err) => warn!(code = %code.masked(), attempt, max_retries, error = %err, "store write failed"),
            }

            if attempt < max_retries {
                let delay = self.policy.delay_after(attempt);
                debug!(code = %code.masked(), attempt, delay_ms = delay.as_millis() as u64, "retrying write");
                tokio::time::sleep(delay).await;
            }
        }

        false
    }

    /// Saves every assignment of one drawing, one code at a time. Codes that
    /// were saved before a failure stay in the store.
    pub async fn persist_drawing(
        &self,
        assignments: &[Assignment],
        created_at: DateTime<Utc>,
    ) -> DrawingReport {
        let drawing_id = DrawingId::from_millis(created_at.timestamp_millis());
        let total = assignments.len();
        let mut saved = Vec::with_capacity(total);
        let mut failed_givers = Vec::new();

        for (idx, assignment) in assignments.iter().enumerate() {
            info!(drawing = %drawing_id, giver = %assignment.giver, "saving code {}/{}", idx + 1, total);
            let record = StoredRecord::new(assignment, &drawing_id, created_at);
            if self
                .save_with_retry(&assignment.code, &record, self.policy.max_retries)
                .await
            {
                saved.push(assignment.code.clone());
            } else {
                error!(drawing = %drawing_id, giver = %assignment.giver, "code not saved");
                failed_givers.push(assignment.giver.clone());
            }
        }

        DrawingReport {
            drawing_id,
            saved,
            failed_givers,
        }
    }

    pub async fn fetch(&self, code: &RedemptionCode) -> Result<Option<StoredRecord>, StoreError> {
        match self.store.get(code.as_str(), Scope::Shared).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn exists(&self, code: &RedemptionCode) -> Result<bool, StoreError> {
        Ok(self.store.get(code.as_str(), Scope::Shared).await?.is_some())
    }

    pub async fn remove(&self, code: &RedemptionCode) -> Result<(), StoreError> {
        self.store.delete(code.as_str(), Scope::Shared).await
    }

    /// Deletes every redemption code in the shared namespace, whether
    /// redeemed or not. A failed listing aborts; failed deletions are counted
    /// and skipped.
    pub async fn clean_old_codes(&self) -> Result<CleanupReport, StoreError> {
        let keys = self.store.list(CODE_PREFIX, Scope::Shared).await?;
        let mut report = CleanupReport::default();

        for key in &keys {
            match self.store.delete(key, Scope::Shared).await {
                Ok(()) => report.deleted += 1,
                Err(err) => {
                    warn!(key = %mask_code(key), error = %err, "could not delete code");
                    report.failed += 1;
                }
            }
        }

        info!(deleted = report.deleted, failed = report.failed, "cleanup finished");
        Ok(report)
    }
}
