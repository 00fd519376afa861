//! Append-only, hash-linked audit entry (`spec.md` §3, §4.8).
//!
//! This module only defines the shape; the hash-chaining algorithm and
//! writer lock live in `grading-audit` (they need a singleton, this crate
//! does not).

use crate::ids::AuditLogId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: AuditLogId,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub event_type: String,
    pub actor_id: Option<Uuid>,
    pub changes: serde_json::Value,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}
