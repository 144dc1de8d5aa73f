use chrono::{DateTime, Utc};
use santa_core::{Assignment, DrawingId};
use serde::{Deserialize, Serialize};

/// Value persisted under a redemption code in the shared namespace.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub giver: String,
    pub receiver: String,
    pub sorteo_id: String,
    pub created_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn new(assignment: &Assignment, drawing_id: &DrawingId, created_at: DateTime<Utc>) -> Self {
        Self {
            giver: assignment.giver.name().to_string(),
            receiver: assignment.receiver.name().to_string(),
            sorteo_id: drawing_id.as_str().to_string(),
            created_at,
        }
    }
}
