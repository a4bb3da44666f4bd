//! Test helper utilities
//!
//! Scripted command execution for git/svn/docker invocations, fixture writers
//! and polling helpers for asynchronous assertions.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use builder_core::{BuilderResult, CommandOutput, CommandRunner, CommandSpec};
use tokio::time::sleep;

type Responder = Arc<dyn Fn(&CommandSpec) -> BuilderResult<CommandOutput> + Send + Sync>;

struct Rule {
    program: String,
    pattern: String,
    responses: VecDeque<Responder>,
}

impl Rule {
    fn matches(&self, spec: &CommandSpec) -> bool {
        spec.program == self.program
            && (self.pattern.is_empty() || spec.args.join(" ").contains(&self.pattern))
    }

    /// Responses are consumed in order; the last one repeats
    fn next(&mut self) -> Option<Responder> {
        if self.responses.len() > 1 {
            self.responses.pop_front()
        } else {
            self.responses.front().cloned()
        }
    }
}

/// `CommandRunner` answering from a script instead of spawning processes
///
/// Rules are checked in insertion order. A rule matches on the program name and
/// a substring of the space-joined arguments. Commands no rule matches succeed
/// with empty output.
#[derive(Clone, Default)]
pub struct ScriptedCommandRunner {
    rules: Arc<Mutex<Vec<Rule>>>,
    calls: Arc<Mutex<Vec<CommandSpec>>>,
}

impl ScriptedCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fixed output for commands matching `program` and `pattern`
    pub fn respond(&self, program: &str, pattern: &str, output: CommandOutput) -> &Self {
        self.respond_with(program, pattern, move |_| Ok(output.clone()))
    }

    /// Queue a computed response, e.g. to create files a clone would produce
    pub fn respond_with<F>(&self, program: &str, pattern: &str, responder: F) -> &Self
    where
        F: Fn(&CommandSpec) -> BuilderResult<CommandOutput> + Send + Sync + 'static,
    {
        let responder: Responder = Arc::new(responder);
        let mut rules = self.rules.lock().unwrap();
        match rules
            .iter_mut()
            .find(|r| r.program == program && r.pattern == pattern)
        {
            Some(rule) => rule.responses.push_back(responder),
            None => rules.push(Rule {
                program: program.to_string(),
                pattern: pattern.to_string(),
                responses: VecDeque::from([responder]),
            }),
        }
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Command lines run for a program, as `display()` strings
    pub fn calls_for(&self, program: &str) -> Vec<String> {
        self.calls()
            .iter()
            .filter(|c| c.program == program)
            .map(CommandSpec::display)
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> BuilderResult<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        let responder = {
            let mut rules = self.rules.lock().unwrap();
            rules
                .iter_mut()
                .find(|rule| rule.matches(spec))
                .and_then(Rule::next)
        };
        match responder {
            Some(responder) => responder(spec),
            None => Ok(CommandOutput::success("")),
        }
    }
}

/// Write `(relative path, content)` pairs under `dir`, creating parents
pub fn write_files(dir: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let full = dir.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }
}

/// Wait for a condition to be true with timeout
pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Initialize test logging once; repeated calls are ignored
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_scripted_responses_repeat_last() {
        let runner = ScriptedCommandRunner::new();
        runner
            .respond("git", "clone", CommandOutput::failure(128, "boom"))
            .respond("git", "clone", CommandOutput::success("ok"));

        let spec = CommandSpec::new("git").args(["clone", "url"]);
        assert!(!runner.run(&spec).await.unwrap().is_success());
        assert!(runner.run(&spec).await.unwrap().is_success());
        assert!(runner.run(&spec).await.unwrap().is_success());

        let other = CommandSpec::new("git").arg("log");
        assert_eq!(runner.run(&other).await.unwrap().stdout, "");
        assert_eq!(runner.calls_for("git").len(), 4);
    }

    #[tokio::test]
    async fn test_wait_for() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let ok = wait_for(
            move || {
                let seen = seen.clone();
                async move { seen.fetch_add(1, Ordering::SeqCst) >= 2 }
            },
            Duration::from_secs(1),
        )
        .await;
        assert!(ok);
        assert!(!wait_for(|| async { false }, Duration::from_millis(50)).await);
    }

    #[test]
    fn test_write_files() {
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), &[("a/b.txt", "x")]);
        assert_eq!(std::fs::read_to_string(dir.path().join("a/b.txt")).unwrap(), "x");
    }
}
