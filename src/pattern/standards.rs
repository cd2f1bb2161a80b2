use crate::store::StandardRow;
use serde_yaml::Mapping;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;

/// Process-wide table of named standard conditions that rules may inherit
/// from with `standard: <name>`. Refreshed from the store on demand;
/// a standards wiki update forces the next refresh to rebuild regardless of
/// whether the rows changed.
#[derive(Default)]
pub struct StandardsCache {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Lowercased name → parsed fragment.
    fragments: HashMap<String, Mapping>,
    rows: Vec<StandardRow>,
    update_required: bool,
}

impl StandardsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the next [`StandardsCache::refresh`] to rebuild.
    pub async fn require_update(&self) {
        self.inner.write().await.update_required = true;
    }

    /// Rebuild the in-memory table from `rows` if they differ by value from
    /// the cached rows, or if an update was forced. Returns whether the
    /// table was rebuilt, in which case loaded rule sets are stale.
    pub async fn refresh(&self, rows: Vec<StandardRow>) -> bool {
        let mut inner = self.inner.write().await;
        if rows == inner.rows && !inner.update_required {
            return false;
        }

        let mut fragments = HashMap::new();
        for row in &rows {
            match serde_yaml::from_str::<Mapping>(&row.yaml) {
                Ok(fragment) => {
                    fragments.insert(row.name.to_lowercase(), fragment);
                }
                // rows are validated at ingest, so this only happens if the
                // table was edited out from under us
                Err(e) => warn!(
                    "Skipping unparseable standard condition {name}: {e}",
                    name = row.name
                ),
            }
        }
        inner.fragments = fragments;
        inner.rows = rows;
        inner.update_required = false;
        true
    }

    pub async fn get(&self, name: &str) -> Option<Mapping> {
        self.inner
            .read()
            .await
            .fragments
            .get(&name.to_lowercase())
            .cloned()
    }
}

/// Overlay a rule's own fields onto an inherited standard fragment.
/// The rule wins on conflict; inherited keys keep their position, so match
/// evaluation order starts with the standard's keys.
pub fn overlay(standard: &Mapping, rule: &Mapping) -> Mapping {
    let mut merged = standard.clone();
    for (key, value) in rule {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
