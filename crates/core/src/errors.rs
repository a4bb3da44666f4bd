use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::i18n::localize;

/// 面向用户的错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    SourceAuthRequired,
    SourceAuthFailed,
    SourceNotFound,
    SourceTimeout,
    SourceEmpty,
    LanguageUnknown,
    RuntimeNotSupported,
    SpecificationViolation,
    ImageNotFound,
    ImageAuthRequired,
    BuildFailed,
    RegistryWriteDisabled,
    OperationTimeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SourceAuthRequired => "SourceAuthRequired",
            ErrorKind::SourceAuthFailed => "SourceAuthFailed",
            ErrorKind::SourceNotFound => "SourceNotFound",
            ErrorKind::SourceTimeout => "SourceTimeout",
            ErrorKind::SourceEmpty => "SourceEmpty",
            ErrorKind::LanguageUnknown => "LanguageUnknown",
            ErrorKind::RuntimeNotSupported => "RuntimeNotSupported",
            ErrorKind::SpecificationViolation => "SpecificationViolation",
            ErrorKind::ImageNotFound => "ImageNotFound",
            ErrorKind::ImageAuthRequired => "ImageAuthRequired",
            ErrorKind::BuildFailed => "BuildFailed",
            ErrorKind::RegistryWriteDisabled => "RegistryWriteDisabled",
            ErrorKind::OperationTimeout => "OperationTimeout",
            ErrorKind::Internal => "Internal",
        }
    }
}

/// 源码仓库认证失败的细分原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// 用户名或密码错误
    Credentials,
    /// SSH 私钥未被仓库接受
    SshKey,
}

/// 源码仓库中缺失的对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingSource {
    Repository(String),
    Branch(String),
}

impl std::fmt::Display for MissingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissingSource::Repository(repo) => write!(f, "repository {repo}"),
            MissingSource::Branch(branch) => write!(f, "branch {branch}"),
        }
    }
}

/// 构建服务错误类型定义
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("源码仓库需要认证: {0}")]
    SourceAuthRequired(String),

    #[error("源码仓库认证失败: {repo} ({reason:?})")]
    SourceAuthFailed { repo: String, reason: AuthFailure },

    #[error("源码不存在: {0}")]
    SourceNotFound(MissingSource),

    #[error("获取源码超时: {0}")]
    SourceTimeout(String),

    #[error("源码仓库为空: {0}")]
    SourceEmpty(String),

    #[error("无法识别项目语言")]
    LanguageUnknown,

    #[error("不支持的运行时版本: {lang} {version}")]
    RuntimeNotSupported { lang: String, version: String },

    #[error("项目不符合规范: {0}")]
    SpecificationViolation(String),

    #[error("镜像不存在: {0}")]
    ImageNotFound(String),

    #[error("镜像仓库需要认证: {0}")]
    ImageAuthRequired(String),

    #[error("构建失败: {0}")]
    BuildFailed(String),

    #[error("operation unsupported; enable REGISTRY_STORAGE_DELETE_ENABLED")]
    RegistryWriteDisabled,

    #[error("操作超时: {0}")]
    OperationTimeout(String),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("键值存储错误: {0}")]
    KvStore(String),

    #[error("镜像仓库错误: {0}")]
    Registry(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("未知的任务类型: {0}")]
    UnknownTaskType(String),

    #[error("任务引擎已满载")]
    Overloaded,

    #[error("等待超时")]
    DeadlineExceeded,

    #[error("操作已取消")]
    Cancelled,

    #[error("消息队列连接不可用")]
    NoConnection,
}

/// 统一的Result类型
pub type BuilderResult<T> = std::result::Result<T, BuilderError>;

impl BuilderError {
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::InvalidTaskParams(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn build_failed<S: Into<String>>(msg: S) -> Self {
        Self::BuildFailed(msg.into())
    }

    pub fn timeout<S: Into<String>>(what: S) -> Self {
        Self::OperationTimeout(what.into())
    }

    /// 映射到面向用户的错误类别
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuilderError::SourceAuthRequired(_) => ErrorKind::SourceAuthRequired,
            BuilderError::SourceAuthFailed { .. } => ErrorKind::SourceAuthFailed,
            BuilderError::SourceNotFound(_) => ErrorKind::SourceNotFound,
            BuilderError::SourceTimeout(_) => ErrorKind::SourceTimeout,
            BuilderError::SourceEmpty(_) => ErrorKind::SourceEmpty,
            BuilderError::LanguageUnknown => ErrorKind::LanguageUnknown,
            BuilderError::RuntimeNotSupported { .. } => ErrorKind::RuntimeNotSupported,
            BuilderError::SpecificationViolation(_) => ErrorKind::SpecificationViolation,
            BuilderError::ImageNotFound(_) => ErrorKind::ImageNotFound,
            BuilderError::ImageAuthRequired(_) => ErrorKind::ImageAuthRequired,
            BuilderError::BuildFailed(_) => ErrorKind::BuildFailed,
            BuilderError::RegistryWriteDisabled => ErrorKind::RegistryWriteDisabled,
            BuilderError::OperationTimeout(_) | BuilderError::DeadlineExceeded => {
                ErrorKind::OperationTimeout
            }
            _ => ErrorKind::Internal,
        }
    }

    /// 是否为上下文类错误（引擎唯一向上传播的错误）
    pub fn is_context_error(&self) -> bool {
        matches!(
            self,
            BuilderError::Cancelled | BuilderError::DeadlineExceeded | BuilderError::NoConnection
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BuilderError::MessageQueue(_)
                | BuilderError::Network(_)
                | BuilderError::Registry(_)
                | BuilderError::DatabaseOperation(_)
                | BuilderError::OperationTimeout(_)
        )
    }

    /// 写入构建日志的用户可见信息
    pub fn user_message(&self) -> String {
        match self {
            BuilderError::SourceAuthRequired(repo) => localize(
                &format!("代码仓库 {repo} 需要提供账号密码或授权密钥"),
                &format!("repository {repo} requires authentication"),
            ),
            BuilderError::SourceAuthFailed { repo, reason } => match reason {
                AuthFailure::Credentials => localize(
                    &format!("代码仓库 {repo} 认证失败，请检查账号密码"),
                    &format!("authentication to {repo} failed, check the credentials"),
                ),
                AuthFailure::SshKey => localize(
                    &format!("代码仓库 {repo} SSH认证失败，请确认已在仓库中添加部署公钥"),
                    &format!("ssh authentication to {repo} failed, check the deploy key"),
                ),
            },
            BuilderError::SourceNotFound(MissingSource::Repository(repo)) => localize(
                &format!("代码仓库 {repo} 不存在"),
                &format!("repository {repo} does not exist"),
            ),
            BuilderError::SourceNotFound(MissingSource::Branch(branch)) => localize(
                &format!("代码分支 {branch} 不存在"),
                &format!("branch {branch} does not exist"),
            ),
            BuilderError::SourceTimeout(repo) => localize(
                &format!("获取代码 {repo} 超时，请检查网络"),
                &format!("fetching {repo} timed out"),
            ),
            BuilderError::SourceEmpty(repo) => localize(
                &format!("代码仓库 {repo} 没有任何提交"),
                &format!("repository {repo} is empty"),
            ),
            BuilderError::LanguageUnknown => {
                localize("无法识别项目的开发语言", "unable to detect the project language")
            }
            BuilderError::RuntimeNotSupported { lang, version } => localize(
                &format!("不支持的 {lang} 运行时版本 {version}"),
                &format!("{lang} runtime {version} is not supported"),
            ),
            BuilderError::SpecificationViolation(detail) => localize(
                &format!("项目不符合构建规范: {detail}"),
                &format!("project does not meet the build conventions: {detail}"),
            ),
            BuilderError::ImageNotFound(image) => localize(
                &format!("镜像 {image} 不存在"),
                &format!("image {image} not found"),
            ),
            BuilderError::ImageAuthRequired(image) => localize(
                &format!("拉取镜像 {image} 需要认证"),
                &format!("image {image} requires authentication"),
            ),
            BuilderError::BuildFailed(detail) => localize(
                &format!("构建失败: {detail}"),
                &format!("build failed: {detail}"),
            ),
            BuilderError::RegistryWriteDisabled => {
                "operation unsupported; enable REGISTRY_STORAGE_DELETE_ENABLED".to_string()
            }
            BuilderError::OperationTimeout(what) => localize(
                &format!("{what} 操作超时"),
                &format!("{what} timed out"),
            ),
            other => localize(
                &format!("系统内部错误: {other}"),
                &format!("internal error: {other}"),
            ),
        }
    }
}

impl From<serde_json::Error> for BuilderError {
    fn from(err: serde_json::Error) -> Self {
        BuilderError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for BuilderError {
    fn from(err: anyhow::Error) -> Self {
        BuilderError::Internal(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for BuilderError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        BuilderError::OperationTimeout("operation".to_string())
    }
}
