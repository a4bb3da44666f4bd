//! 外部命令执行
//!
//! git、svn、docker 等命令都通过 [`CommandRunner`] 调用，测试中可以替换为脚本化的实现。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::errors::{BuilderError, BuilderResult};

/// 待执行的命令
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: BTreeMap<String, String>,
    pub stdin: Option<String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 用于日志的命令行，`password` 等参数值不会被隐藏，调用方不应把凭据放在参数中
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// 命令执行结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// 合并 stdout 与 stderr，便于匹配错误信息
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// 输出的最后几行，用于错误提示
    pub fn tail(&self, lines: usize) -> String {
        let combined = self.combined();
        let all: Vec<&str> = combined.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// 外部命令执行接口
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// 执行命令并收集输出。非零退出码不视为错误，由调用方判断；
    /// 超时返回 `OperationTimeout`，无法启动返回 `Io`
    async fn run(&self, spec: &CommandSpec) -> BuilderResult<CommandOutput>;
}

/// 基于 tokio 子进程的命令执行器
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    async fn run_to_end(spec: &CommandSpec) -> BuilderResult<CommandOutput> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.envs {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;

        if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await?;
            drop(stdin);
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BuilderError::internal("无法获取stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BuilderError::internal("无法获取stderr"))?;

        let program = spec.program.as_str();
        let stdout_task = async {
            let mut lines = BufReader::new(stdout).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(program, "{}", line);
                collected.push(line);
            }
            collected.join("\n")
        };
        let stderr_task = async {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(program, "{}", line);
                collected.push(line);
            }
            collected.join("\n")
        };

        let (stdout, stderr) = tokio::join!(stdout_task, stderr_task);
        let status = child.wait().await?;

        Ok(CommandOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> BuilderResult<CommandOutput> {
        let start = Instant::now();
        let output = match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, Self::run_to_end(spec))
                .await
                .map_err(|_| BuilderError::OperationTimeout(spec.program.clone()))??,
            None => Self::run_to_end(spec).await?,
        };
        debug!(
            command = %spec.display(),
            exit_code = ?output.exit_code,
            duration_ms = start.elapsed().as_millis() as u64,
            "命令执行完成"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[cfg(unix)]
    async fn test_run_collects_output() {
        let runner = ProcessRunner::new();
        let output = runner
            .run(&CommandSpec::new("sh").args(["-c", "echo out; echo err 1>&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout, "out");
        assert_eq!(output.stderr, "err");
        assert!(!output.is_success());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_stdin_and_env() {
        let runner = ProcessRunner::new();
        let output = runner
            .run(
                &CommandSpec::new("sh")
                    .args(["-c", "read line; echo \"$line-$SUFFIX\""])
                    .env("SUFFIX", "ok")
                    .stdin("hello\n"),
            )
            .await
            .unwrap();
        assert_eq!(output.stdout, "hello-ok");
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_timeout() {
        let runner = ProcessRunner::new();
        let err = runner
            .run(
                &CommandSpec::new("sleep")
                    .arg("5")
                    .timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BuilderError::OperationTimeout(_)));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = ProcessRunner::new()
            .run(&CommandSpec::new("definitely-not-a-real-binary-xyz"))
            .await
            .unwrap_err();
        assert!(matches!(err, BuilderError::Io(_)));
    }

    #[test]
    fn test_tail() {
        let output = CommandOutput::failure(1, "a\nb\nc");
        assert_eq!(output.tail(2), "b\nc");
    }
}
