// Object metadata shared by every desired-state document.
//
// Every entity in the data model (spec.md §3) is identified by
// `(namespace, name)` and carries a monotonically increasing `generation`.
// Cluster-scoped kinds (SessionRetentionPolicy, SessionAnalyticsSync,
// SessionStreamingConfig) use the empty string as their namespace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    /// Incremented by the admission layer on every spec change.
    pub generation: i64,
    pub created_at: DateTime<Utc>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            generation: 1,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> (String, String) {
        (self.namespace.clone(), self.name.clone())
    }

    /// Bump the generation; called by the admission layer whenever `spec` changes.
    pub fn bump_generation(&mut self) {
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_object_starts_at_generation_one() {
        let meta = ObjectMeta::new("team-a", "my-agent");
        assert_eq!(meta.generation, 1);
        assert_eq!(meta.key(), ("team-a".to_string(), "my-agent".to_string()));
    }

    #[test]
    fn bump_generation_is_monotonic() {
        let mut meta = ObjectMeta::new("team-a", "my-agent");
        meta.bump_generation();
        meta.bump_generation();
        assert_eq!(meta.generation, 3);
    }
}
