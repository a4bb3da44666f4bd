//! 源码项目分析：汇总语言、规范检查、运行时与服务信息

use std::path::Path;

use builder_core::models::{CheckErrorInfo, ServiceInfo, ServicePort};
use builder_core::{BuilderError, BuilderResult, Language};
use tracing::debug;

use crate::dockerfile::Dockerfile;
use crate::lang::detect_language;
use crate::maven::list_modules;
use crate::runtime::detect_runtime;
use crate::service_config::ServiceConfigFile;
use crate::spec_check::check_specification;

/// 未声明端口时使用的默认端口
pub const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectReport {
    pub language: Language,
    pub services: Vec<ServiceInfo>,
    pub issues: Vec<CheckErrorInfo>,
}

impl ProjectReport {
    pub fn has_fatal(&self) -> bool {
        self.issues.iter().any(CheckErrorInfo::is_fatal)
    }

    /// 第一个不合规项转为错误
    pub fn into_result(self) -> BuilderResult<Self> {
        let fatal = self.issues.iter().find(|issue| issue.is_fatal()).cloned();
        match fatal {
            Some(issue) if self.language == Language::None => {
                debug!(reason = %issue.error_info, "项目语言无法识别");
                Err(BuilderError::LanguageUnknown)
            }
            Some(issue) => Err(BuilderError::SpecificationViolation(format!(
                "{}，{}",
                issue.error_info, issue.solve_advice
            ))),
            None => Ok(self),
        }
    }
}

/// 分析工作树，问题以检查项返回，只有读文件失败等意外情况返回错误
pub fn analyze_project(dir: &Path) -> BuilderResult<ProjectReport> {
    let mut issues = Vec::new();

    let config = match ServiceConfigFile::load(dir) {
        Ok(config) => config,
        Err(BuilderError::SpecificationViolation(msg)) => {
            issues.push(CheckErrorInfo::fatal(msg, "请修正 katofile 的 YAML 格式"));
            None
        }
        Err(e) => return Err(e),
    };

    let language = config
        .as_ref()
        .and_then(ServiceConfigFile::language)
        .unwrap_or_else(|| detect_language(dir));
    if language == Language::None {
        issues.push(CheckErrorInfo::fatal(
            "无法识别项目语言",
            "请确认代码仓库地址与分支正确，或在 katofile 中声明 language",
        ));
        return Ok(ProjectReport {
            language,
            services: Vec::new(),
            issues,
        });
    }

    issues.extend(check_specification(dir, language));

    let dockerfile = if language == Language::Dockerfile {
        match Dockerfile::load(&dir.join("Dockerfile")) {
            Ok(dockerfile) => Some(dockerfile),
            Err(e) => {
                issues.push(CheckErrorInfo::fatal(
                    e.to_string(),
                    "请检查 Dockerfile 的语法",
                ));
                None
            }
        }
    } else {
        None
    };

    let runtime = match detect_runtime(dir, language) {
        Ok(runtime) => runtime.unwrap_or_default(),
        Err(e @ BuilderError::RuntimeNotSupported { .. }) => {
            issues.push(CheckErrorInfo::fatal(
                e.user_message(),
                "请修改为平台支持的运行时版本",
            ));
            String::new()
        }
        Err(e) => return Err(e),
    };

    let mut base = ServiceInfo {
        language: language.as_str().to_string(),
        memory: language.memory_mb(),
        runtime,
        ..Default::default()
    };

    if let Some(dockerfile) = &dockerfile {
        base.ports = dockerfile
            .exposed_ports()
            .into_iter()
            .map(|p| ServicePort {
                container_port: p.port,
                protocol: if p.protocol == "udp" { "udp".into() } else { "http".into() },
            })
            .collect();
        base.envs = dockerfile.envs();
        base.cmd = dockerfile.command();
        base.volumes = dockerfile.volumes();
    }
    if let Ok(procfile) = std::fs::read_to_string(dir.join("Procfile")) {
        base.procfile = procfile.trim().to_string();
    }
    if let Some(config) = &config {
        if !config.ports.is_empty() {
            base.ports = config
                .ports
                .iter()
                .map(|p| ServicePort {
                    container_port: p.port,
                    protocol: p.protocol.clone(),
                })
                .collect();
        }
        base.envs.extend(config.envs.clone());
        if !config.cmd.is_empty() {
            base.cmd = config.cmd.clone();
        }
        base.build_path = config.build_path.clone();
    }
    if base.ports.is_empty() && language != Language::Dockerfile {
        base.ports.push(ServicePort::http(DEFAULT_PORT));
    }

    let services = expand_services(dir, language, &base, config.as_ref(), &mut issues)?;
    debug!(
        dir = %dir.display(),
        language = %language,
        services = services.len(),
        issues = issues.len(),
        "项目分析完成"
    );

    Ok(ProjectReport {
        language,
        services,
        issues,
    })
}

/// Maven 多模块或 katofile 的 services 声明拆分为多个服务
fn expand_services(
    dir: &Path,
    language: Language,
    base: &ServiceInfo,
    config: Option<&ServiceConfigFile>,
    issues: &mut Vec<CheckErrorInfo>,
) -> BuilderResult<Vec<ServiceInfo>> {
    if language == Language::JavaMaven {
        let modules = match list_modules(dir) {
            Ok(modules) => modules,
            Err(BuilderError::SpecificationViolation(msg)) => {
                issues.push(CheckErrorInfo::fatal(msg, "请检查各模块的 pom.xml"));
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        if !modules.is_empty() {
            return Ok(modules
                .into_iter()
                .map(|module| {
                    let mut service = base.clone();
                    service.name = module.name;
                    service.cname = module.artifact_id;
                    service.build_path = module.relative_path;
                    service.envs.extend(module.envs);
                    service.procfile = module.procfile;
                    service
                })
                .collect());
        }
    }

    if let Some(config) = config.filter(|c| !c.services.is_empty()) {
        return Ok(config
            .services
            .iter()
            .map(|declared| {
                let mut service = base.clone();
                service.name = declared.name.clone();
                service.cname = declared.name.clone();
                service.build_path = declared.build_path.clone();
                if !declared.ports.is_empty() {
                    service.ports = declared
                        .ports
                        .iter()
                        .map(|p| ServicePort {
                            container_port: p.port,
                            protocol: p.protocol.clone(),
                        })
                        .collect();
                }
                service.envs.extend(declared.envs.clone());
                if !declared.cmd.is_empty() {
                    service.cmd = declared.cmd.clone();
                }
                service
            })
            .collect());
    }

    Ok(vec![base.clone()])
}
