//! Test data builders with sensible defaults

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use builder_core::models::{
    BuildRequest, CommitInfo, DeliveredType, FinalStatus, HostAlias, Language, Task, TaskType,
    VersionRecord,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::mocks::RecordingLogger;

/// Builder for creating test tasks
pub struct TaskBuilder {
    task_type: String,
    body: Value,
    task_id: Option<String>,
}

impl TaskBuilder {
    pub fn new(task_type: TaskType) -> Self {
        Self::raw(task_type.as_str())
    }

    /// A task whose type string is not validated, e.g. an unknown type
    pub fn raw(task_type: &str) -> Self {
        Self {
            task_type: task_type.to_string(),
            body: json!({}),
            task_id: None,
        }
    }

    pub fn with_id(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Set a single body field, keeping the others
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        if let Value::Object(map) = &mut self.body {
            map.insert(key.to_string(), value);
        }
        self
    }

    pub fn build(self) -> Task {
        let mut task = Task::new(self.task_type, self.body);
        if let Some(id) = self.task_id {
            task.task_id = id;
        }
        task
    }
}

/// Builder for version records
pub struct VersionRecordBuilder {
    record: VersionRecord,
}

impl VersionRecordBuilder {
    pub fn new(component_id: &str, deploy_version: &str) -> Self {
        Self {
            record: VersionRecord::new(
                component_id,
                deploy_version,
                "event-1",
                TaskType::BuildFromSourceCode.as_str(),
            ),
        }
    }

    pub fn with_kind(mut self, kind: TaskType) -> Self {
        self.record.kind = kind.as_str().to_string();
        self
    }

    pub fn with_event(mut self, event_id: &str) -> Self {
        self.record.event_id = event_id.to_string();
        self
    }

    pub fn delivered_image(mut self, image: &str) -> Self {
        self.record.delivered_type = Some(DeliveredType::Image);
        self.record.delivered_path = image.to_string();
        self.record.image_name = image.to_string();
        self.record.final_status = Some(FinalStatus::Success);
        self.record.finish_time = Some(Utc::now());
        self
    }

    pub fn delivered_slug(mut self, path: &str) -> Self {
        self.record.delivered_type = Some(DeliveredType::Slug);
        self.record.delivered_path = path.to_string();
        self.record.final_status = Some(FinalStatus::Success);
        self.record.finish_time = Some(Utc::now());
        self
    }

    pub fn failed(mut self) -> Self {
        self.record.mark_failure();
        self
    }

    pub fn unusable(mut self) -> Self {
        self.record.usable = false;
        self
    }

    pub fn created_at(mut self, time: DateTime<Utc>) -> Self {
        self.record.create_time = time;
        self
    }

    pub fn build(self) -> VersionRecord {
        self.record
    }
}

/// Builder for build requests; the logger is a `RecordingLogger`
pub struct BuildRequestBuilder {
    request: BuildRequest,
    logger: RecordingLogger,
}

impl BuildRequestBuilder {
    pub fn new(source_dir: &Path) -> Self {
        let logger = RecordingLogger::new("event-1");
        let request = BuildRequest {
            repo_url: "https://git.example.com/team/app.git".to_string(),
            branch: "master".to_string(),
            source_dir: source_dir.to_path_buf(),
            cache_dir: source_dir.join(".cache"),
            tgz_dir: source_dir.join(".slug"),
            tenant_id: "tenant-1".to_string(),
            component_id: "component-1".to_string(),
            service_alias: "gr123456".to_string(),
            deploy_version: "20230101120000".to_string(),
            event_id: "event-1".to_string(),
            runtime: String::new(),
            lang: Language::Dockerfile,
            build_envs: HashMap::new(),
            commit: CommitInfo {
                hash: "abc123".to_string(),
                author: "dev".to_string(),
                message: "init".to_string(),
            },
            host_aliases: Vec::new(),
            logger: Arc::new(logger.clone()),
        };
        Self { request, logger }
    }

    pub fn with_lang(mut self, lang: Language) -> Self {
        self.request.lang = lang;
        self
    }

    pub fn with_component(mut self, tenant_id: &str, component_id: &str) -> Self {
        self.request.tenant_id = tenant_id.to_string();
        self.request.component_id = component_id.to_string();
        self
    }

    pub fn with_version(mut self, deploy_version: &str) -> Self {
        self.request.deploy_version = deploy_version.to_string();
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.request
            .build_envs
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_runtime(mut self, runtime: &str) -> Self {
        self.request.runtime = runtime.to_string();
        self
    }

    pub fn with_host_alias(mut self, ip: &str, hostnames: &[&str]) -> Self {
        self.request.host_aliases.push(HostAlias {
            ip: ip.to_string(),
            hostnames: hostnames.iter().map(|h| h.to_string()).collect(),
        });
        self
    }

    pub fn with_dirs(mut self, cache_dir: PathBuf, tgz_dir: PathBuf) -> Self {
        self.request.cache_dir = cache_dir;
        self.request.tgz_dir = tgz_dir;
        self
    }

    /// The request plus a handle on its logger for assertions
    pub fn build(self) -> (BuildRequest, RecordingLogger) {
        (self.request, self.logger)
    }
}
