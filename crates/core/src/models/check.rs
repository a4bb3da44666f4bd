use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 服务检测的整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Success,
    Failure,
}

/// 检测问题的严重程度：建议项不影响构建，不合规项会阻止构建
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckSeverity {
    Advice,
    NonConformance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckErrorInfo {
    pub error_type: CheckSeverity,
    pub error_info: String,
    pub solve_advice: String,
}

impl CheckErrorInfo {
    pub fn fatal(info: impl Into<String>, advice: impl Into<String>) -> Self {
        Self {
            error_type: CheckSeverity::NonConformance,
            error_info: info.into(),
            solve_advice: advice.into(),
        }
    }

    pub fn advice(info: impl Into<String>, advice: impl Into<String>) -> Self {
        Self {
            error_type: CheckSeverity::Advice,
            error_info: info.into(),
            solve_advice: advice.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.error_type == CheckSeverity::NonConformance
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub container_port: u16,
    pub protocol: String,
}

impl ServicePort {
    pub fn http(port: u16) -> Self {
        Self {
            container_port: port,
            protocol: "http".to_string(),
        }
    }
}

/// 检测出的单个服务（多模块项目每个模块一个）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub language: String,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    pub memory: u32,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub build_path: String,
    #[serde(default)]
    pub runtime: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cname: String,
    #[serde(default)]
    pub procfile: String,
}

/// 写入 `/servicecheck/<check_uuid>` 的检测结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCheckResult {
    pub check_status: CheckStatus,
    #[serde(default)]
    pub error_infos: Vec<CheckErrorInfo>,
    #[serde(default)]
    pub service_info: Vec<ServiceInfo>,
}

impl ServiceCheckResult {
    /// 有不合规项时状态为失败，仅有建议项时仍为成功
    pub fn from_parts(error_infos: Vec<CheckErrorInfo>, service_info: Vec<ServiceInfo>) -> Self {
        let check_status = if error_infos.iter().any(CheckErrorInfo::is_fatal) {
            CheckStatus::Failure
        } else {
            CheckStatus::Success
        };
        Self {
            check_status,
            error_infos,
            service_info,
        }
    }

    pub fn failure(error: CheckErrorInfo) -> Self {
        Self {
            check_status: CheckStatus::Failure,
            error_infos: vec![error],
            service_info: Vec::new(),
        }
    }
}

pub fn service_check_key(check_uuid: &str) -> String {
    format!("/servicecheck/{check_uuid}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advice_does_not_fail_check() {
        let result = ServiceCheckResult::from_parts(
            vec![CheckErrorInfo::advice("缺少 Procfile", "添加 Procfile")],
            vec![ServiceInfo::default()],
        );
        assert_eq!(result.check_status, CheckStatus::Success);

        let result = ServiceCheckResult::from_parts(
            vec![CheckErrorInfo::fatal("缺少 composer.lock", "执行 composer install")],
            vec![],
        );
        assert_eq!(result.check_status, CheckStatus::Failure);
    }

    #[test]
    fn test_wire_names() {
        let value = serde_json::to_value(CheckErrorInfo::fatal("a", "b")).unwrap();
        assert_eq!(value["error_type"], "non-conformance");
        assert_eq!(service_check_key("c1"), "/servicecheck/c1");
    }
}
