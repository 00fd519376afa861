//! Append-only, hash-linked audit chain (`spec.md` §3, §4.8).
//!
//! Every write through a service boundary — exam create, question add,
//! rubric update, grade write, override, submission state change — emits one
//! `AuditLog` entry here. Each entry's hash chains the previous entry's hash
//! into a SHA-256 digest, so corruption anywhere in the chain is detectable
//! by recomputing forward from a known-good checkpoint. The chain is
//! read-only from outside this crate; the only way to append is through
//! `AuditWriter`, which serializes hash computation and insertion so the
//! chain is never built out of order under concurrent callers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grading_types::{AuditLog, AuditLogId, GradingError, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info};
use uuid::Uuid;

/// Seed for the first entry in an otherwise-empty chain (`spec.md` §3).
pub const GENESIS_HASH: &str = "genesis";

/// Serializes an arbitrary JSON value with keys sorted at every nesting
/// level, so hash input never depends on a `HashMap`'s iteration order.
/// `serde_json::Value`'s default `Map` does not guarantee key order under a
/// plain build (unlike Go's `encoding/json.Marshal`, which the original
/// implementation incidentally relies on) — recorded as a resolved Open
/// Question in `DESIGN.md`.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            serde_json::to_value(sorted).unwrap_or(Value::Null)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// `hash_i = SHA256(hash_{i-1} ‖ entity_type ‖ entity_id ‖ event_type ‖ actor_id ‖ canonical(changes))`
/// (`spec.md` §3).
pub fn compute_hash(
    prev_hash: &str,
    entity_type: &str,
    entity_id: Uuid,
    event_type: &str,
    actor_id: Option<Uuid>,
    changes: &Value,
) -> String {
    let canonical = canonicalize(changes).to_string();
    let actor = actor_id.map(|id| id.to_string()).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(entity_type.as_bytes());
    hasher.update(entity_id.to_string().as_bytes());
    hasher.update(event_type.as_bytes());
    hasher.update(actor.as_bytes());
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Persistence boundary the audit writer depends on. A real backend is
/// Postgres (out of scope, per `spec.md` §1); this crate ships only the
/// in-memory reference implementation below.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: AuditLog) -> Result<()>;

    /// Hash of the most recently appended entry, or `GENESIS_HASH` if the
    /// chain is empty.
    async fn last_hash(&self) -> Result<String>;

    /// All entries for one entity, oldest first.
    async fn list_for_entity(&self, entity_type: &str, entity_id: Uuid) -> Result<Vec<AuditLog>>;

    /// The full chain in append order, for integrity verification.
    async fn all_ordered(&self) -> Result<Vec<AuditLog>>;
}

#[derive(Default)]
pub struct InMemoryAuditStore {
    entries: parking_lot::Mutex<Vec<AuditLog>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, entry: AuditLog) -> Result<()> {
        self.entries.lock().push(entry);
        Ok(())
    }

    async fn last_hash(&self) -> Result<String> {
        Ok(self
            .entries
            .lock()
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string()))
    }

    async fn list_for_entity(&self, entity_type: &str, entity_id: Uuid) -> Result<Vec<AuditLog>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn all_ordered(&self) -> Result<Vec<AuditLog>> {
        Ok(self.entries.lock().clone())
    }
}

pub type SharedAuditStore = Arc<dyn AuditStore>;

/// Singleton writer with exclusive access to the chain tail. Holds an async
/// lock across "read last hash, compute next hash, insert" so two
/// concurrent callers can never race to chain off the same tail (`spec.md`
/// §5: "the audit writer holds an exclusive lock during hash computation +
/// insert").
pub struct AuditWriter {
    store: SharedAuditStore,
    lock: AsyncMutex<()>,
}

impl AuditWriter {
    pub fn new(store: SharedAuditStore) -> Self {
        Self {
            store,
            lock: AsyncMutex::new(()),
        }
    }

    /// Append one entry to the chain. Fails with `GradingError::Dependency`
    /// if the underlying store errors.
    pub async fn record(
        &self,
        entity_type: impl Into<String>,
        entity_id: Uuid,
        event_type: impl Into<String>,
        actor_id: Option<Uuid>,
        changes: Value,
    ) -> Result<AuditLog> {
        let entity_type = entity_type.into();
        let event_type = event_type.into();

        let _guard = self.lock.lock().await;
        let prev_hash = self.store.last_hash().await?;
        let hash = compute_hash(&prev_hash, &entity_type, entity_id, &event_type, actor_id, &changes);
        let entry = AuditLog {
            id: AuditLogId::new(),
            entity_type,
            entity_id,
            event_type,
            actor_id,
            changes,
            hash,
            created_at: now(),
        };
        self.store.append(entry.clone()).await?;
        info!(
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            event_type = %entry.event_type,
            "audit entry recorded"
        );
        Ok(entry)
    }

    /// Same as `record`, but swallows failure after logging it — the caller
    /// site for every business operation, per `spec.md` §4.8: "Writes are
    /// best-effort from the caller's perspective (audit failure is logged
    /// but does not fail the business operation)".
    pub async fn record_best_effort(
        &self,
        entity_type: impl Into<String>,
        entity_id: Uuid,
        event_type: impl Into<String>,
        actor_id: Option<Uuid>,
        changes: Value,
    ) -> Option<AuditLog> {
        let entity_type = entity_type.into();
        let event_type = event_type.into();
        match self
            .record(entity_type.clone(), entity_id, event_type.clone(), actor_id, changes)
            .await
        {
            Ok(entry) => Some(entry),
            Err(err) => {
                error!(
                    entity_type = %entity_type,
                    entity_id = %entity_id,
                    event_type = %event_type,
                    error = %err,
                    "audit write failed, business operation proceeds regardless"
                );
                None
            }
        }
    }

    pub fn store(&self) -> &SharedAuditStore {
        &self.store
    }
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Recompute the chain forward and confirm every entry's hash matches what
/// `compute_hash` would produce given its predecessor — `spec.md` §8
/// invariant 3. Returns the index of the first mismatch as an
/// `IntegrityError`, or `Ok(())` if the whole chain verifies.
pub fn verify_chain(entries: &[AuditLog]) -> Result<()> {
    let mut prev_hash = GENESIS_HASH.to_string();
    for (index, entry) in entries.iter().enumerate() {
        let expected = compute_hash(
            &prev_hash,
            &entry.entity_type,
            entry.entity_id,
            &entry.event_type,
            entry.actor_id,
            &entry.changes,
        );
        if expected != entry.hash {
            return Err(GradingError::integrity(format!(
                "audit chain broken at index {index}: expected hash {expected}, found {}",
                entry.hash
            )));
        }
        prev_hash = entry.hash.clone();
    }
    Ok(())
}
