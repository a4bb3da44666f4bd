//! Container runtime and registry doubles
//!
//! `MockContainerRuntime` keeps a set of "local" images and a call log, so tests
//! can assert on the exact sequence of pull/tag/push operations.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use builder_core::config::RegistryCredential;
use builder_core::models::ImageRef;
use builder_core::{
    BuilderError, BuilderResult, CommandOutput, ContainerRuntime, ImageBuildOptions, ImageInspect,
    RegistryApi, RunOptions, TrustedRegistry,
};

type RunHook = Arc<dyn Fn(&RunOptions) -> BuilderResult<CommandOutput> + Send + Sync>;

/// A recorded push: image plus the user that authenticated it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRecord {
    pub image: String,
    pub user: Option<String>,
}

#[derive(Default)]
struct RuntimeState {
    images: HashSet<String>,
    calls: Vec<String>,
    pushes: Vec<PushRecord>,
    builds: Vec<ImageBuildOptions>,
    runs: Vec<RunOptions>,
    failures: HashMap<&'static str, (usize, fn(&str) -> BuilderError)>,
    loaded: Vec<String>,
}

/// In-memory container runtime
#[derive(Clone, Default)]
pub struct MockContainerRuntime {
    state: Arc<Mutex<RuntimeState>>,
    run_hook: Option<RunHook>,
}

impl MockContainerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend the images are already present locally
    pub fn with_images(images: &[&str]) -> Self {
        let runtime = Self::new();
        {
            let mut state = runtime.state.lock().unwrap();
            state.images.extend(images.iter().map(|i| i.to_string()));
        }
        runtime
    }

    /// Make the next `times` calls of `op` fail with the given error
    pub fn fail(&self, op: &'static str, times: usize, error: fn(&str) -> BuilderError) {
        self.state.lock().unwrap().failures.insert(op, (times, error));
    }

    /// Images reported by `load`
    pub fn set_loaded_images(&self, images: &[&str]) {
        self.state.lock().unwrap().loaded = images.iter().map(|i| i.to_string()).collect();
    }

    pub fn with_run_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RunOptions) -> BuilderResult<CommandOutput> + Send + Sync + 'static,
    {
        self.run_hook = Some(Arc::new(hook));
        self
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.state.lock().unwrap().images.contains(image)
    }

    /// Calls in order, formatted as `"<op> <args>"`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, op: &str) -> Vec<String> {
        let prefix = format!("{op} ");
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(&prefix))
            .collect()
    }

    pub fn pushes(&self) -> Vec<PushRecord> {
        self.state.lock().unwrap().pushes.clone()
    }

    pub fn builds(&self) -> Vec<ImageBuildOptions> {
        self.state.lock().unwrap().builds.clone()
    }

    pub fn runs(&self) -> Vec<RunOptions> {
        self.state.lock().unwrap().runs.clone()
    }

    fn record(&self, op: &'static str, args: &str) -> BuilderResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{op} {args}"));
        if let Some((remaining, error)) = state.failures.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error(args));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for MockContainerRuntime {
    async fn pull(
        &self,
        image: &str,
        _credential: Option<&RegistryCredential>,
        _timeout: Duration,
    ) -> BuilderResult<()> {
        self.record("pull", image)?;
        self.state.lock().unwrap().images.insert(image.to_string());
        Ok(())
    }

    async fn push(
        &self,
        image: &str,
        credential: Option<&RegistryCredential>,
        _timeout: Duration,
    ) -> BuilderResult<()> {
        self.record("push", image)?;
        let mut state = self.state.lock().unwrap();
        if !state.images.contains(image) {
            return Err(BuilderError::ImageNotFound(image.to_string()));
        }
        state.pushes.push(PushRecord {
            image: image.to_string(),
            user: credential.map(|c| c.username.clone()),
        });
        Ok(())
    }

    async fn tag(&self, source: &str, target: &str) -> BuilderResult<()> {
        self.record("tag", &format!("{source} {target}"))?;
        let mut state = self.state.lock().unwrap();
        if !state.images.contains(source) {
            return Err(BuilderError::ImageNotFound(source.to_string()));
        }
        state.images.insert(target.to_string());
        Ok(())
    }

    async fn inspect(&self, image: &str) -> BuilderResult<Option<ImageInspect>> {
        self.record("inspect", image)?;
        let state = self.state.lock().unwrap();
        Ok(state.images.contains(image).then(|| ImageInspect {
            id: format!("sha256:{:x}", image.len()),
            repo_tags: vec![image.to_string()],
            ..Default::default()
        }))
    }

    async fn remove(&self, image: &str) -> BuilderResult<()> {
        self.record("remove", image)?;
        self.state.lock().unwrap().images.remove(image);
        Ok(())
    }

    async fn build(&self, options: &ImageBuildOptions, _timeout: Duration) -> BuilderResult<()> {
        self.record("build", &options.tag)?;
        let mut state = self.state.lock().unwrap();
        state.images.insert(options.tag.clone());
        state.builds.push(options.clone());
        Ok(())
    }

    async fn save(&self, images: &[String], dest: &Path) -> BuilderResult<()> {
        self.record("save", &images.join(" "))?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, images.join("\n"))?;
        Ok(())
    }

    async fn load(&self, archive: &Path) -> BuilderResult<Vec<String>> {
        self.record("load", &archive.display().to_string())?;
        let mut state = self.state.lock().unwrap();
        let loaded = state.loaded.clone();
        state.images.extend(loaded.iter().cloned());
        Ok(loaded)
    }

    async fn run(&self, options: &RunOptions) -> BuilderResult<CommandOutput> {
        self.record("run", &options.image)?;
        self.state.lock().unwrap().runs.push(options.clone());
        match &self.run_hook {
            Some(hook) => hook(options),
            None => Ok(CommandOutput::success("")),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    tags: BTreeMap<String, Vec<(String, String)>>,
    existing: HashSet<String>,
    delete_disabled: bool,
    delete_attempts: usize,
    deleted: Vec<(String, String)>,
    failing_tags: HashSet<String>,
}

/// Registry V2 API double: per-repository tag lists with fixed digests
#[derive(Clone, Default)]
pub struct MockRegistryApi {
    state: Arc<Mutex<RegistryState>>,
}

impl MockRegistryApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register tags for a repository; digests are `sha256:<repo>-<tag>`
    pub fn with_tags(self, repository: &str, tags: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let entry = state.tags.entry(repository.to_string()).or_default();
            for tag in tags {
                entry.push((tag.to_string(), Self::digest_of(repository, tag)));
            }
        }
        self
    }

    /// Register a tag with an explicit digest, e.g. two tags sharing one manifest
    pub fn with_tag_digest(self, repository: &str, tag: &str, digest: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .tags
            .entry(repository.to_string())
            .or_default()
            .push((tag.to_string(), digest.to_string()));
        self
    }

    /// Make `tags` fail for a repository with a registry error
    pub fn fail_tags(self, repository: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_tags
            .insert(repository.to_string());
        self
    }

    /// Images answered as existing by `exists`, matched on `ImageRef` display
    pub fn with_existing(self, images: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .existing
            .extend(images.iter().map(|i| i.to_string()));
        self
    }

    pub fn disable_delete(self) -> Self {
        self.state.lock().unwrap().delete_disabled = true;
        self
    }

    pub fn digest_of(repository: &str, tag: &str) -> String {
        format!("sha256:{}-{}", repository.replace('/', "_"), tag)
    }

    pub fn delete_attempts(&self) -> usize {
        self.state.lock().unwrap().delete_attempts
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// Tags left in a repository after deletions
    pub fn remaining_tags(&self, repository: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .tags
            .get(repository)
            .map(|tags| tags.iter().map(|(tag, _)| tag.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RegistryApi for MockRegistryApi {
    async fn exists(
        &self,
        image: &ImageRef,
        _credential: Option<&RegistryCredential>,
    ) -> BuilderResult<bool> {
        Ok(self.state.lock().unwrap().existing.contains(&image.to_string()))
    }

    async fn tags(&self, repository: &str) -> BuilderResult<Vec<String>> {
        if self.state.lock().unwrap().failing_tags.contains(repository) {
            return Err(BuilderError::Registry("500".to_string()));
        }
        Ok(self.remaining_tags(repository))
    }

    async fn manifest_digest_v2(&self, repository: &str, tag: &str) -> BuilderResult<String> {
        let state = self.state.lock().unwrap();
        state
            .tags
            .get(repository)
            .and_then(|tags| tags.iter().find(|(t, _)| t == tag))
            .map(|(_, digest)| digest.clone())
            .ok_or_else(|| BuilderError::ImageNotFound(format!("{repository}:{tag}")))
    }

    async fn delete_manifest(&self, repository: &str, digest: &str) -> BuilderResult<()> {
        let mut state = self.state.lock().unwrap();
        state.delete_attempts += 1;
        if state.delete_disabled {
            return Err(BuilderError::RegistryWriteDisabled);
        }
        if let Some(tags) = state.tags.get_mut(repository) {
            tags.retain(|(_, d)| d != digest);
        }
        state
            .deleted
            .push((repository.to_string(), digest.to_string()));
        Ok(())
    }
}

/// A recorded trusted-registry repository creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRepository {
    pub domain: String,
    pub namespace: String,
    pub name: String,
    pub description: String,
}

/// Trusted registry double
#[derive(Clone, Default)]
pub struct MockTrustedRegistry {
    existing: Arc<Mutex<HashSet<String>>>,
    created: Arc<Mutex<Vec<CreatedRepository>>>,
}

impl MockTrustedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repositories given as `namespace/name`
    pub fn with_repositories(repositories: &[&str]) -> Self {
        let registry = Self::new();
        registry
            .existing
            .lock()
            .unwrap()
            .extend(repositories.iter().map(|r| r.to_string()));
        registry
    }

    pub fn created(&self) -> Vec<CreatedRepository> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrustedRegistry for MockTrustedRegistry {
    async fn repository_exists(
        &self,
        _domain: &str,
        namespace: &str,
        name: &str,
        _credential: &RegistryCredential,
    ) -> BuilderResult<bool> {
        Ok(self
            .existing
            .lock()
            .unwrap()
            .contains(&format!("{namespace}/{name}")))
    }

    async fn create_repository(
        &self,
        domain: &str,
        namespace: &str,
        name: &str,
        short_description: &str,
        _credential: &RegistryCredential,
    ) -> BuilderResult<()> {
        self.existing
            .lock()
            .unwrap()
            .insert(format!("{namespace}/{name}"));
        self.created.lock().unwrap().push(CreatedRepository {
            domain: domain.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            description: short_description.to_string(),
        });
        Ok(())
    }
}
