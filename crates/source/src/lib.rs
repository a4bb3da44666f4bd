//! 源码获取与项目识别
//!
//! - 把 git、svn、对象存储中的代码取到本地工作树
//! - 识别项目语言并检查项目是否符合对应构建方式的约定
//! - 提取运行时版本、Maven 多模块、Dockerfile 和 `docker run` 命令中的服务信息

pub mod acquirer;
pub mod docker_run;
pub mod dockerfile;
pub mod git;
pub mod lang;
pub mod maven;
pub mod oss;
pub mod project;
pub mod repo_info;
pub mod runtime;
pub mod service_config;
pub mod spec_check;
pub mod svn;

pub use acquirer::{DefaultSourceAcquirer, SourceAcquirer, WorkTree};
pub use lang::{detect_language, detect_with_config};
pub use project::{analyze_project, ProjectReport};
pub use repo_info::{RepoBuildInfo, RepoProtocol};
pub use service_config::{ServiceConfigFile, SERVICE_CONFIG_FILE};
