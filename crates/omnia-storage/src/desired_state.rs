//! Generic desired-state / status persistence (spec.md §3, §10.4).
//!
//! Every entity kind (AgentRuntime, PromptPack, Provider, ArenaSource, ...)
//! is stored in the same shape: `(kind, namespace, name)` identifies the
//! object, `generation` bumps on every spec write, `spec`/`status` are
//! opaque JSON blobs the calling crate (de)serializes into its own domain
//! types, and `conditions` is a child collection so the store never needs to
//! understand condition semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use omnia_core::Condition;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(ObjectKey),

    #[error("generation conflict: expected {expected}, store has {actual}")]
    GenerationConflict { expected: i64, actual: i64 },

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Identifies a desired-state object. Cluster-scoped kinds (spec.md §3 —
/// SessionRetentionPolicy, SessionAnalyticsSync, SessionStreamingConfig) use
/// the empty string as `namespace`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// A stored object: opaque spec/status JSON plus the bookkeeping every
/// reconciler needs (generation, observedGeneration, conditions).
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: ObjectKey,
    pub generation: i64,
    pub spec: Value,
    pub observed_generation: i64,
    pub status: Value,
    pub conditions: Vec<Condition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredObject {
    pub fn is_reconciled(&self) -> bool {
        self.observed_generation == self.generation
    }
}

/// Storage seam for desired-state documents. Implemented by an in-memory
/// store (used by every reconciler's test suite) and a Postgres-backed one
/// (used by the running control plane).
#[async_trait]
pub trait DesiredStateStore: Send + Sync {
    /// Create or overwrite an object's `spec`, bumping `generation`.
    /// Returns the new generation.
    async fn put_spec(&self, key: ObjectKey, spec: Value) -> Result<i64, StoreError>;

    async fn get(&self, key: &ObjectKey) -> Result<Option<StoredObject>, StoreError>;

    async fn list(&self, kind: &str, namespace: Option<&str>) -> Result<Vec<StoredObject>, StoreError>;

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;

    /// Write reconciler-observed status. Only ever called by the reconciler
    /// that owns this kind (spec.md §3: "Status is written only by the
    /// reconciler"). Last-writer-wins; conflicts are not expected here
    /// because the queue guarantees per-key serialization (spec.md §5).
    async fn put_status(
        &self,
        key: &ObjectKey,
        observed_generation: i64,
        status: Value,
        conditions: Vec<Condition>,
    ) -> Result<(), StoreError>;
}

/// In-memory `DesiredStateStore`, the default for every component crate's
/// test suite (mirrors `durable::persistence::InMemoryWorkflowEventStore`).
#[derive(Default)]
pub struct InMemoryDesiredStateStore {
    objects: DashMap<ObjectKey, StoredObject>,
}

impl InMemoryDesiredStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DesiredStateStore for InMemoryDesiredStateStore {
    async fn put_spec(&self, key: ObjectKey, spec: Value) -> Result<i64, StoreError> {
        let now = Utc::now();
        let generation = match self.objects.get_mut(&key) {
            Some(mut existing) => {
                existing.generation += 1;
                existing.spec = spec;
                existing.updated_at = now;
                existing.generation
            }
            None => {
                let generation = 1;
                self.objects.insert(
                    key.clone(),
                    StoredObject {
                        key: key.clone(),
                        generation,
                        spec,
                        observed_generation: 0,
                        status: Value::Null,
                        conditions: Vec::new(),
                        created_at: now,
                        updated_at: now,
                    },
                );
                generation
            }
        };
        Ok(generation)
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<StoredObject>, StoreError> {
        Ok(self.objects.get(key).map(|r| r.clone()))
    }

    async fn list(&self, kind: &str, namespace: Option<&str>) -> Result<Vec<StoredObject>, StoreError> {
        Ok(self
            .objects
            .iter()
            .filter(|r| r.key.kind == kind && namespace.map(|ns| ns == r.key.namespace).unwrap_or(true))
            .map(|r| r.clone())
            .collect())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        self.objects.remove(key);
        Ok(())
    }

    async fn put_status(
        &self,
        key: &ObjectKey,
        observed_generation: i64,
        status: Value,
        conditions: Vec<Condition>,
    ) -> Result<(), StoreError> {
        let mut existing = self
            .objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        existing.observed_generation = observed_generation;
        existing.status = status;
        existing.conditions = conditions;
        existing.updated_at = Utc::now();
        Ok(())
    }
}

/// Postgres-backed `DesiredStateStore`: one generic table rather than one
/// table per kind, matching the registry-driven (not schema-per-kind)
/// design of spec.md §4.1/§9.
pub struct PostgresDesiredStateStore {
    pool: Arc<sqlx::PgPool>,
}

impl PostgresDesiredStateStore {
    pub fn new(pool: Arc<sqlx::PgPool>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS desired_state (
                kind TEXT NOT NULL,
                namespace TEXT NOT NULL,
                name TEXT NOT NULL,
                generation BIGINT NOT NULL,
                spec JSONB NOT NULL,
                observed_generation BIGINT NOT NULL DEFAULT 0,
                status JSONB NOT NULL DEFAULT '{}'::jsonb,
                conditions JSONB NOT NULL DEFAULT '[]'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (kind, namespace, name)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl DesiredStateStore for PostgresDesiredStateStore {
    async fn put_spec(&self, key: ObjectKey, spec: Value) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO desired_state (kind, namespace, name, generation, spec)
            VALUES ($1, $2, $3, 1, $4)
            ON CONFLICT (kind, namespace, name)
            DO UPDATE SET generation = desired_state.generation + 1, spec = EXCLUDED.spec, updated_at = now()
            RETURNING generation
            "#,
        )
        .bind(&key.kind)
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(&spec)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(row.0)
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<StoredObject>, StoreError> {
        let row = sqlx::query_as::<_, Row>(
            r#"SELECT kind, namespace, name, generation, spec, observed_generation, status, conditions, created_at, updated_at
               FROM desired_state WHERE kind = $1 AND namespace = $2 AND name = $3"#,
        )
        .bind(&key.kind)
        .bind(&key.namespace)
        .bind(&key.name)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        row.map(StoredObject::try_from).transpose()
    }

    async fn list(&self, kind: &str, namespace: Option<&str>) -> Result<Vec<StoredObject>, StoreError> {
        let rows = if let Some(ns) = namespace {
            sqlx::query_as::<_, Row>(
                r#"SELECT kind, namespace, name, generation, spec, observed_generation, status, conditions, created_at, updated_at
                   FROM desired_state WHERE kind = $1 AND namespace = $2 ORDER BY name"#,
            )
            .bind(kind)
            .bind(ns)
            .fetch_all(self.pool.as_ref())
            .await
        } else {
            sqlx::query_as::<_, Row>(
                r#"SELECT kind, namespace, name, generation, spec, observed_generation, status, conditions, created_at, updated_at
                   FROM desired_state WHERE kind = $1 ORDER BY namespace, name"#,
            )
            .bind(kind)
            .fetch_all(self.pool.as_ref())
            .await
        }
        .map_err(|e| StoreError::Database(e.to_string()))?;
        rows.into_iter().map(StoredObject::try_from).collect()
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM desired_state WHERE kind = $1 AND namespace = $2 AND name = $3")
            .bind(&key.kind)
            .bind(&key.namespace)
            .bind(&key.name)
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn put_status(
        &self,
        key: &ObjectKey,
        observed_generation: i64,
        status: Value,
        conditions: Vec<Condition>,
    ) -> Result<(), StoreError> {
        let conditions_json =
            serde_json::to_value(&conditions).map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"UPDATE desired_state SET observed_generation = $4, status = $5, conditions = $6, updated_at = now()
               WHERE kind = $1 AND namespace = $2 AND name = $3"#,
        )
        .bind(&key.kind)
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(observed_generation)
        .bind(&status)
        .bind(&conditions_json)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct Row {
    kind: String,
    namespace: String,
    name: String,
    generation: i64,
    spec: Value,
    observed_generation: i64,
    status: Value,
    conditions: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<Row> for StoredObject {
    type Error = StoreError;

    fn try_from(row: Row) -> Result<Self, StoreError> {
        let conditions: Vec<Condition> =
            serde_json::from_value(row.conditions).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(StoredObject {
            key: ObjectKey::new(row.kind, row.namespace, row.name),
            generation: row.generation,
            spec: row.spec,
            observed_generation: row.observed_generation,
            status: row.status,
            conditions,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnia_core::ConditionStatus;
    use serde_json::json;

    #[tokio::test]
    async fn put_spec_starts_at_generation_one_and_bumps_on_update() {
        let store = InMemoryDesiredStateStore::new();
        let key = ObjectKey::new("PromptPack", "team-a", "support-bot");

        let g1 = store.put_spec(key.clone(), json!({"version": "1.0.0"})).await.unwrap();
        assert_eq!(g1, 1);

        let g2 = store.put_spec(key.clone(), json!({"version": "1.1.0"})).await.unwrap();
        assert_eq!(g2, 2);

        let obj = store.get(&key).await.unwrap().unwrap();
        assert_eq!(obj.generation, 2);
        assert!(!obj.is_reconciled());
    }

    #[tokio::test]
    async fn put_status_marks_object_reconciled() {
        let store = InMemoryDesiredStateStore::new();
        let key = ObjectKey::new("PromptPack", "team-a", "support-bot");
        let generation = store.put_spec(key.clone(), json!({"version": "1.0.0"})).await.unwrap();

        store
            .put_status(
                &key,
                generation,
                json!({"phase": "Active"}),
                vec![Condition::new("SchemaValid", ConditionStatus::True, "Valid", "ok")],
            )
            .await
            .unwrap();

        let obj = store.get(&key).await.unwrap().unwrap();
        assert!(obj.is_reconciled());
        assert_eq!(obj.status["phase"], "Active");
    }

    #[tokio::test]
    async fn list_filters_by_kind_and_namespace() {
        let store = InMemoryDesiredStateStore::new();
        store
            .put_spec(ObjectKey::new("PromptPack", "a", "x"), json!({}))
            .await
            .unwrap();
        store
            .put_spec(ObjectKey::new("PromptPack", "b", "y"), json!({}))
            .await
            .unwrap();
        store
            .put_spec(ObjectKey::new("Provider", "a", "z"), json!({}))
            .await
            .unwrap();

        let in_a = store.list("PromptPack", Some("a")).await.unwrap();
        assert_eq!(in_a.len(), 1);
        assert_eq!(in_a[0].key.name, "x");

        let all_packs = store.list("PromptPack", None).await.unwrap();
        assert_eq!(all_packs.len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_object() {
        let store = InMemoryDesiredStateStore::new();
        let key = ObjectKey::new("PromptPack", "a", "x");
        store.put_spec(key.clone(), json!({})).await.unwrap();
        store.delete(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
    }
}
