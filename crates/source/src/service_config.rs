//! 仓库根目录的服务配置文件 `katofile`

use std::collections::BTreeMap;
use std::path::Path;

use builder_core::{BuilderError, BuilderResult, Language};
use serde::{Deserialize, Serialize};

pub const SERVICE_CONFIG_FILE: &str = "katofile";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPort {
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "http".to_string()
}

/// 多模块项目中的子服务声明
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigService {
    pub name: String,
    #[serde(default)]
    pub build_path: String,
    #[serde(default)]
    pub ports: Vec<ConfigPort>,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
    #[serde(default)]
    pub cmd: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfigFile {
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub build_path: String,
    #[serde(default)]
    pub ports: Vec<ConfigPort>,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub services: Vec<ConfigService>,
}

impl ServiceConfigFile {
    /// 读取仓库根目录下的配置文件，不存在时返回 `None`
    pub fn load(dir: &Path) -> BuilderResult<Option<Self>> {
        let path = dir.join(SERVICE_CONFIG_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content).map(Some)
    }

    pub fn parse(content: &str) -> BuilderResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| {
            BuilderError::SpecificationViolation(format!("{SERVICE_CONFIG_FILE} 格式错误: {e}"))
        })
    }

    /// 声明的语言，未声明或无法识别时返回 `None`
    pub fn language(&self) -> Option<Language> {
        if self.language.trim().is_empty() {
            return None;
        }
        Language::parse_lenient(&self.language).filter(|lang| *lang != Language::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let config = ServiceConfigFile::parse(
            r#"
language: Java-maven
build_path: app
ports:
  - port: 8080
    protocol: http
  - port: 9000
envs:
  JAVA_OPTS: -Xmx512m
cmd: java -jar app.jar
services:
  - name: api
    build_path: api
"#,
        )
        .unwrap();
        assert_eq!(config.language(), Some(Language::JavaMaven));
        assert_eq!(config.ports.len(), 2);
        assert_eq!(config.ports[1].protocol, "http");
        assert_eq!(config.envs["JAVA_OPTS"], "-Xmx512m");
        assert_eq!(config.services[0].name, "api");
    }

    #[test]
    fn test_unknown_language_is_ignored() {
        let config = ServiceConfigFile::parse("language: cobol\n").unwrap();
        assert_eq!(config.language(), None);
        assert_eq!(ServiceConfigFile::parse("").unwrap(), ServiceConfigFile::default());
    }

    #[test]
    fn test_malformed_file() {
        let err = ServiceConfigFile::parse("ports: [port: x").unwrap_err();
        assert!(matches!(err, BuilderError::SpecificationViolation(_)));
    }
}
