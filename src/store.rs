use async_trait::async_trait;
use serde::{Deserialize, Serialize};
#[cfg(test)]
use std::collections::HashMap;
use std::fs::{create_dir_all, read_dir, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::queue::Queue;

/// Per-community persistent state. Created on first wiki sync; watermarks
/// advance at the end of each queue pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommunityConfig {
    pub name: String,
    pub enabled: bool,
    #[serde(with = "time::serde::timestamp")]
    pub last_submission: OffsetDateTime,
    #[serde(with = "time::serde::timestamp")]
    pub last_spam: OffsetDateTime,
    #[serde(with = "time::serde::timestamp")]
    pub last_comment: OffsetDateTime,
    #[serde(default)]
    pub exclude_banned_modqueue: bool,
    #[serde(default)]
    pub conditions_yaml: String,
}

impl CommunityConfig {
    /// A freshly-synced community starts with watermarks a day in the past so
    /// the first pass picks up recent items.
    pub fn new(name: String, now: OffsetDateTime) -> Self {
        let day_ago = now - time::Duration::days(1);
        Self {
            name,
            enabled: true,
            last_submission: day_ago,
            last_spam: day_ago,
            last_comment: day_ago,
            exclude_banned_modqueue: false,
            conditions_yaml: String::new(),
        }
    }

    pub fn watermark(&self, queue: Queue) -> Option<OffsetDateTime> {
        match queue {
            Queue::Submission => Some(self.last_submission),
            Queue::Spam => Some(self.last_spam),
            Queue::Comment => Some(self.last_comment),
            // the report queue uses a configured lookback window instead
            Queue::Report => None,
        }
    }

    pub fn set_watermark(&mut self, queue: Queue, when: OffsetDateTime) {
        match queue {
            Queue::Submission => self.last_submission = when,
            Queue::Spam => self.last_spam = when,
            Queue::Comment => self.last_comment = when,
            Queue::Report => {}
        }
    }
}

/// A named shared rule fragment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StandardRow {
    pub name: String,
    pub yaml: String,
}

/// One row per (item, condition, action) triple. Append-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub item_fullname: String,
    pub condition_yaml: String,
    /// Absent for message-only rows.
    #[serde(default)]
    pub action: Option<String>,
    #[serde(with = "time::serde::timestamp")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent state the engine depends on: community configs, the standards
/// table, and the durable action log.
#[async_trait]
pub trait Store: Send + Sync {
    async fn communities(&self) -> StoreResult<Vec<CommunityConfig>>;
    async fn community(&self, name: &str) -> StoreResult<Option<CommunityConfig>>;
    async fn upsert_community(&self, config: &CommunityConfig) -> StoreResult<()>;

    async fn standards(&self) -> StoreResult<Vec<StandardRow>>;
    async fn upsert_standard(&self, row: &StandardRow) -> StoreResult<()>;

    async fn actions_for(&self, item_fullname: &str) -> StoreResult<Vec<ActionLogEntry>>;
    async fn append_action(&self, entry: &ActionLogEntry) -> StoreResult<()>;
}

/// File-backed store: one YAML file per community, a YAML standards table,
/// and a JSON-lines action log that is indexed in memory on open.
pub struct YamlStore {
    dir: PathBuf,
    log: Mutex<Vec<ActionLogEntry>>,
}

impl YamlStore {
    pub fn open(dir: &Path) -> StoreResult<Self> {
        create_dir_all(dir.join("communities"))?;
        let mut log = Vec::new();
        let log_path = Self::log_path(dir);
        if log_path.exists() {
            let reader = BufReader::new(File::open(&log_path)?);
            for line in reader.lines() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                log.push(serde_json::from_str(&line)?);
            }
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            log: Mutex::new(log),
        })
    }

    fn log_path(dir: &Path) -> PathBuf {
        dir.join("action_log.jsonl")
    }

    fn community_path(&self, name: &str) -> PathBuf {
        self.dir.join("communities").join(format!("{name}.yaml"))
    }

    fn standards_path(&self) -> PathBuf {
        self.dir.join("standards.yaml")
    }

    fn save_yaml<T: Serialize>(path: &Path, data: &T) -> StoreResult<()> {
        if let Some(dir) = path.parent() {
            create_dir_all(dir)?;
        }
        let file = File::create(path)?;
        serde_yaml::to_writer(file, data)?;
        Ok(())
    }
}

#[async_trait]
impl Store for YamlStore {
    async fn communities(&self) -> StoreResult<Vec<CommunityConfig>> {
        let mut communities = Vec::new();
        for entry in read_dir(self.dir.join("communities"))? {
            let path = entry?.path();
            if path.extension().map_or(true, |ext| ext != "yaml") {
                continue;
            }
            let config: CommunityConfig = serde_yaml::from_reader(File::open(&path)?)?;
            communities.push(config);
        }
        communities.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(communities)
    }

    async fn community(&self, name: &str) -> StoreResult<Option<CommunityConfig>> {
        let path = self.community_path(name);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_yaml::from_reader(File::open(&path)?)?))
    }

    async fn upsert_community(&self, config: &CommunityConfig) -> StoreResult<()> {
        Self::save_yaml(&self.community_path(&config.name), config)
    }

    async fn standards(&self) -> StoreResult<Vec<StandardRow>> {
        let path = self.standards_path();
        if !path.exists() {
            return Ok(vec![]);
        }
        Ok(serde_yaml::from_reader(File::open(&path)?)?)
    }

    async fn upsert_standard(&self, row: &StandardRow) -> StoreResult<()> {
        let mut rows = self.standards().await?;
        match rows
            .iter_mut()
            .find(|existing| existing.name.eq_ignore_ascii_case(&row.name))
        {
            Some(existing) => existing.yaml = row.yaml.clone(),
            None => rows.push(row.clone()),
        }
        Self::save_yaml(&self.standards_path(), &rows)
    }

    async fn actions_for(&self, item_fullname: &str) -> StoreResult<Vec<ActionLogEntry>> {
        let log = self.log.lock().await;
        Ok(log
            .iter()
            .filter(|entry| entry.item_fullname == item_fullname)
            .cloned()
            .collect())
    }

    async fn append_action(&self, entry: &ActionLogEntry) -> StoreResult<()> {
        let mut log = self.log.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(Self::log_path(&self.dir))?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        log.push(entry.clone());
        Ok(())
    }
}

/// In-memory store for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[cfg(test)]
#[derive(Default)]
struct MemoryInner {
    communities: HashMap<String, CommunityConfig>,
    standards: Vec<StandardRow>,
    log: Vec<ActionLogEntry>,
}

#[cfg(test)]
#[async_trait]
impl Store for MemoryStore {
    async fn communities(&self) -> StoreResult<Vec<CommunityConfig>> {
        let inner = self.inner.lock().await;
        let mut communities: Vec<_> = inner.communities.values().cloned().collect();
        communities.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(communities)
    }

    async fn community(&self, name: &str) -> StoreResult<Option<CommunityConfig>> {
        let inner = self.inner.lock().await;
        Ok(inner.communities.get(name).cloned())
    }

    async fn upsert_community(&self, config: &CommunityConfig) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .communities
            .insert(config.name.clone(), config.clone());
        Ok(())
    }

    async fn standards(&self) -> StoreResult<Vec<StandardRow>> {
        let inner = self.inner.lock().await;
        Ok(inner.standards.clone())
    }

    async fn upsert_standard(&self, row: &StandardRow) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        match inner
            .standards
            .iter_mut()
            .find(|existing| existing.name.eq_ignore_ascii_case(&row.name))
        {
            Some(existing) => existing.yaml = row.yaml.clone(),
            None => inner.standards.push(row.clone()),
        }
        Ok(())
    }

    async fn actions_for(&self, item_fullname: &str) -> StoreResult<Vec<ActionLogEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .log
            .iter()
            .filter(|entry| entry.item_fullname == item_fullname)
            .cloned()
            .collect())
    }

    async fn append_action(&self, entry: &ActionLogEntry) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.log.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
impl MemoryStore {
    pub async fn log_len(&self) -> usize {
        self.inner.lock().await.log.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_yaml_store_round_trip() {
        let dir = tempfile::tempdir().expect("Couldn't create temp dir");
        let store = YamlStore::open(dir.path()).expect("Couldn't open store");

        let config = CommunityConfig::new("testing".to_string(), OffsetDateTime::UNIX_EPOCH);
        store.upsert_community(&config).await.expect("upsert");
        assert_eq!(
            store.community("testing").await.expect("get"),
            Some(config.clone())
        );
        assert_eq!(store.communities().await.expect("list"), vec![config]);

        store
            .upsert_standard(&StandardRow {
                name: "bad-words".to_string(),
                yaml: "body: [foo]\n".to_string(),
            })
            .await
            .expect("standard");
        store
            .upsert_standard(&StandardRow {
                name: "Bad-Words".to_string(),
                yaml: "body: [foo, bar]\n".to_string(),
            })
            .await
            .expect("standard update");
        let standards = store.standards().await.expect("standards");
        assert_eq!(standards.len(), 1);
        assert_eq!(standards[0].yaml, "body: [foo, bar]\n");
    }

    #[tokio::test]
    async fn test_action_log_survives_reopen() {
        let dir = tempfile::tempdir().expect("Couldn't create temp dir");
        let entry = ActionLogEntry {
            item_fullname: "t3_abc".to_string(),
            condition_yaml: "action: remove\n".to_string(),
            action: Some("remove".to_string()),
            timestamp: OffsetDateTime::UNIX_EPOCH,
        };

        {
            let store = YamlStore::open(dir.path()).expect("open");
            store.append_action(&entry).await.expect("append");
        }

        let store = YamlStore::open(dir.path()).expect("reopen");
        assert_eq!(store.actions_for("t3_abc").await.expect("read"), vec![entry]);
        assert!(store.actions_for("t3_zzz").await.expect("read").is_empty());
    }
}
