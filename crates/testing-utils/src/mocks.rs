//! In-memory implementations of the collaborator traits
//!
//! Every mock keeps its state behind `Arc<Mutex<_>>` so clones share it, and
//! exposes inspection helpers for assertions.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use builder_core::models::{PluginBuildVersion, Task, VersionRecord};
use builder_core::{
    BuildLogger, BuilderError, BuilderResult, ComponentRepository, KeyValueStore, LogStatus,
    LoggerFactory, PluginVersionRepository, SlugStorage, TaskQueue, VersionRepository,
};
use tokio::sync::Notify;
use tracing::Level;

/// Mock implementation of VersionRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockVersionRepository {
    records: Arc<Mutex<Vec<VersionRecord>>>,
}

impl MockVersionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<VersionRecord>) -> Self {
        Self {
            records: Arc::new(Mutex::new(records)),
        }
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn find(&self, component_id: &str, deploy_version: &str) -> Option<VersionRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.component_id == component_id && r.deploy_version == deploy_version)
            .cloned()
    }
}

#[async_trait]
impl VersionRepository for MockVersionRepository {
    async fn get(
        &self,
        component_id: &str,
        deploy_version: &str,
    ) -> BuilderResult<Option<VersionRecord>> {
        Ok(self.find(component_id, deploy_version))
    }

    async fn create(&self, record: &VersionRecord) -> BuilderResult<()> {
        let mut records = self.records.lock().unwrap();
        if records.iter().any(|r| {
            r.component_id == record.component_id && r.deploy_version == record.deploy_version
        }) {
            return Err(BuilderError::DatabaseOperation(format!(
                "version {}:{} already exists",
                record.component_id, record.deploy_version
            )));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn update(&self, record: &VersionRecord) -> BuilderResult<()> {
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| {
            r.component_id == record.component_id && r.deploy_version == record.deploy_version
        }) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(BuilderError::DatabaseOperation(format!(
                "version {}:{} not found",
                record.component_id, record.deploy_version
            ))),
        }
    }

    async fn list_by_component(&self, component_id: &str) -> BuilderResult<Vec<VersionRecord>> {
        let mut list: Vec<VersionRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.component_id == component_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.create_time.cmp(&a.create_time));
        Ok(list)
    }

    async fn list_usable_versions(&self, component_id: &str) -> BuilderResult<Vec<String>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.component_id == component_id && r.usable)
            .map(|r| r.deploy_version.clone())
            .collect())
    }

    async fn list_component_ids(&self) -> BuilderResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.component_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn delete(&self, component_id: &str, deploy_version: &str) -> BuilderResult<()> {
        self.records
            .lock()
            .unwrap()
            .retain(|r| !(r.component_id == component_id && r.deploy_version == deploy_version));
        Ok(())
    }
}

/// Mock implementation of ComponentRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockComponentRepository {
    deleted: Arc<Mutex<Vec<String>>>,
    live: Arc<Mutex<Vec<String>>>,
}

impl MockComponentRepository {
    pub fn new(live: &[&str], deleted: &[&str]) -> Self {
        Self {
            live: Arc::new(Mutex::new(live.iter().map(|s| s.to_string()).collect())),
            deleted: Arc::new(Mutex::new(deleted.iter().map(|s| s.to_string()).collect())),
        }
    }
}

#[async_trait]
impl ComponentRepository for MockComponentRepository {
    async fn list_deleted_components(&self) -> BuilderResult<Vec<String>> {
        Ok(self.deleted.lock().unwrap().clone())
    }

    async fn list_live_components(&self) -> BuilderResult<Vec<String>> {
        Ok(self.live.lock().unwrap().clone())
    }
}

/// Mock implementation of PluginVersionRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockPluginVersionRepository {
    versions: Arc<Mutex<HashMap<(String, String), PluginBuildVersion>>>,
}

impl MockPluginVersionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, plugin_id: &str, deploy_version: &str) -> Option<PluginBuildVersion> {
        self.versions
            .lock()
            .unwrap()
            .get(&(plugin_id.to_string(), deploy_version.to_string()))
            .cloned()
    }
}

#[async_trait]
impl PluginVersionRepository for MockPluginVersionRepository {
    async fn get(
        &self,
        plugin_id: &str,
        deploy_version: &str,
    ) -> BuilderResult<Option<PluginBuildVersion>> {
        Ok(self.find(plugin_id, deploy_version))
    }

    async fn save(&self, version: &PluginBuildVersion) -> BuilderResult<()> {
        self.versions.lock().unwrap().insert(
            (version.plugin_id.clone(), version.deploy_version.clone()),
            version.clone(),
        );
        Ok(())
    }
}

/// In-memory broker. Every enqueued task is also kept in a history for assertions.
#[derive(Debug, Clone, Default)]
pub struct MockTaskQueue {
    queues: Arc<Mutex<HashMap<String, VecDeque<Task>>>>,
    history: Arc<Mutex<Vec<(String, Task)>>>,
    notify: Arc<Notify>,
    closed: Arc<Mutex<bool>>,
}

impl MockTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// All tasks ever enqueued to `topic`, in order
    pub fn published(&self, topic: &str) -> Vec<Task> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, task)| task.clone())
            .collect()
    }

    pub fn pending(&self, topic: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(topic)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    fn pop(&self, topic: &str) -> Option<Task> {
        self.queues
            .lock()
            .unwrap()
            .get_mut(topic)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl TaskQueue for MockTaskQueue {
    async fn dequeue(
        &self,
        topic: &str,
        _client_host: &str,
        timeout: Duration,
    ) -> BuilderResult<Task> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if *self.closed.lock().unwrap() {
                return Err(BuilderError::Cancelled);
            }
            let notified = self.notify.notified();
            if let Some(task) = self.pop(topic) {
                return Ok(task);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(BuilderError::DeadlineExceeded);
            }
        }
    }

    async fn enqueue(&self, topic: &str, task: &Task) -> BuilderResult<()> {
        self.queues
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push_back(task.clone());
        self.history
            .lock()
            .unwrap()
            .push((topic.to_string(), task.clone()));
        self.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> BuilderResult<()> {
        *self.closed.lock().unwrap() = true;
        self.notify.notify_waiters();
        Ok(())
    }
}

/// Mock implementation of KeyValueStore for testing
#[derive(Debug, Clone, Default)]
pub struct MockKeyValueStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MockKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn json(&self, key: &str) -> Option<serde_json::Value> {
        self.value(key)
            .and_then(|raw| serde_json::from_str(&raw).ok())
    }
}

#[async_trait]
impl KeyValueStore for MockKeyValueStore {
    async fn put(&self, key: &str, value: &str) -> BuilderResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> BuilderResult<Option<String>> {
        Ok(self.value(key))
    }

    async fn list_prefix(&self, prefix: &str) -> BuilderResult<Vec<(String, String)>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn delete(&self, key: &str) -> BuilderResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Slug storage backed by a map of "remote" paths to file contents
#[derive(Debug, Clone, Default)]
pub struct MockSlugStorage {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MockSlugStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, content: &[u8]) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_vec());
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }
}

#[async_trait]
impl SlugStorage for MockSlugStorage {
    async fn fetch(&self, source: &str, dest: &Path) -> BuilderResult<()> {
        let content = self
            .files
            .lock()
            .unwrap()
            .get(source)
            .cloned()
            .ok_or_else(|| BuilderError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("slug {source} not found"),
            )))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, content).await?;
        Ok(())
    }

    async fn upload(&self, source: &Path, dest: &str) -> BuilderResult<()> {
        let content = tokio::fs::read(source).await?;
        self.files
            .lock()
            .unwrap()
            .insert(dest.to_string(), content);
        Ok(())
    }

    async fn remove(&self, path: &str) -> BuilderResult<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }
}

/// One captured build-log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: Level,
    pub message: String,
    pub step: String,
    pub status: LogStatus,
}

/// BuildLogger that records every line
#[derive(Debug, Clone, Default)]
pub struct RecordingLogger {
    event_id: String,
    lines: Arc<Mutex<Vec<LogLine>>>,
    closed: Arc<Mutex<bool>>,
}

impl RecordingLogger {
    pub fn new(event_id: &str) -> Self {
        Self {
            event_id: event_id.to_string(),
            ..Default::default()
        }
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|l| l.level == Level::ERROR)
            .map(|l| l.message)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

#[async_trait]
impl BuildLogger for RecordingLogger {
    fn event_id(&self) -> &str {
        &self.event_id
    }

    async fn log(&self, level: Level, message: &str, step: &str, status: LogStatus) {
        self.lines.lock().unwrap().push(LogLine {
            level,
            message: message.to_string(),
            step: step.to_string(),
            status,
        });
    }

    async fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

/// Hands out one shared RecordingLogger per event id
#[derive(Debug, Clone, Default)]
pub struct RecordingLoggerFactory {
    loggers: Arc<Mutex<HashMap<String, RecordingLogger>>>,
}

impl RecordingLoggerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logger(&self, event_id: &str) -> RecordingLogger {
        self.loggers
            .lock()
            .unwrap()
            .entry(event_id.to_string())
            .or_insert_with(|| RecordingLogger::new(event_id))
            .clone()
    }
}

impl LoggerFactory for RecordingLoggerFactory {
    fn for_event(&self, event_id: &str) -> Arc<dyn BuildLogger> {
        Arc::new(self.logger(event_id))
    }
}
