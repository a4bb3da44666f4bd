//! 运行时版本提取

use std::path::Path;
use std::sync::OnceLock;

use builder_core::{BuilderError, BuilderResult, Language};
use regex::Regex;

/// 支持的 PHP 版本
pub const PHP_VERSIONS: [&str; 6] = ["5.5.38", "5.6.35", "7.0.29", "7.1.33", "7.2.26", "7.3.13"];

/// Node 版本约束无法确定时使用的默认版本
pub const DEFAULT_NODE_VERSION: &str = "11.1.0";

/// 读取项目声明的运行时版本，未声明时返回 `None`
pub fn detect_runtime(dir: &Path, lang: Language) -> BuilderResult<Option<String>> {
    match lang {
        Language::Php => php_runtime(dir),
        Language::Python => Ok(python_runtime(dir)),
        Language::JavaMaven | Language::JavaJar | Language::JavaWar | Language::Gradle => {
            Ok(java_runtime(dir))
        }
        Language::Nodejs | Language::NodejsStatic => Ok(node_runtime(dir)),
        _ => Ok(None),
    }
}

fn php_runtime(dir: &Path) -> BuilderResult<Option<String>> {
    let Some(composer) = read_json(&dir.join("composer.json")) else {
        return Ok(None);
    };
    let Some(constraint) = composer
        .get("require")
        .and_then(|require| require.get("php"))
        .and_then(|php| php.as_str())
    else {
        return Ok(None);
    };
    map_php_version(constraint)
}

/// 把 composer 的版本约束映射到支持的版本
///
/// 只比较主次版本号，`*` 或空约束表示不限定
pub fn map_php_version(constraint: &str) -> BuilderResult<Option<String>> {
    let first = constraint
        .split(['|', ','])
        .next()
        .unwrap_or_default()
        .trim()
        .trim_start_matches(['>', '<', '=', '~', '^', 'v', ' ']);
    if first.is_empty() || first == "*" {
        return Ok(None);
    }

    let mut parts = first.split('.');
    let major = parts.next().unwrap_or_default();
    let minor = parts.next().filter(|m| *m != "*" && *m != "x").unwrap_or("0");
    let prefix = format!("{major}.{minor}.");

    PHP_VERSIONS
        .iter()
        .find(|version| version.starts_with(&prefix))
        .map(|version| Some(version.to_string()))
        .ok_or_else(|| BuilderError::RuntimeNotSupported {
            lang: Language::Php.as_str().to_string(),
            version: constraint.to_string(),
        })
}

fn python_runtime(dir: &Path) -> Option<String> {
    std::fs::read_to_string(dir.join("runtime.txt"))
        .ok()
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
}

fn java_runtime(dir: &Path) -> Option<String> {
    static VERSION: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = VERSION
        .get_or_init(|| Regex::new(r"\d+(?:\.\d+)?").ok())
        .as_ref()?;

    let content = std::fs::read_to_string(dir.join("system.properties")).ok()?;
    content
        .lines()
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim() == "java.runtime.version")
        .and_then(|(_, value)| pattern.find(value.trim()))
        .map(|found| found.as_str().to_string())
}

fn node_runtime(dir: &Path) -> Option<String> {
    let package = read_json(&dir.join("package.json"))?;
    let version = package.get("engines")?.get("node")?.as_str()?.trim();
    Some(map_node_version(version))
}

/// 范围约束改写为默认版本，精确版本去掉前缀符号
pub fn map_node_version(version: &str) -> String {
    let wildcard = version.is_empty()
        || version.contains('*')
        || version.contains('x')
        || version.contains('>')
        || version.contains('<')
        || version.contains("||")
        || version.contains(' ');
    if wildcard {
        return DEFAULT_NODE_VERSION.to_string();
    }
    version.trim_start_matches(['^', '~', '=', 'v']).to_string()
}

fn read_json(path: &Path) -> Option<serde_json::Value> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_php_version_mapping() {
        assert_eq!(map_php_version(">=7.2").unwrap().as_deref(), Some("7.2.26"));
        assert_eq!(map_php_version("~5.6").unwrap().as_deref(), Some("5.6.35"));
        assert_eq!(map_php_version("7.1.3").unwrap().as_deref(), Some("7.1.33"));
        assert_eq!(map_php_version("^7.0 || ^8.0").unwrap().as_deref(), Some("7.0.29"));
        assert_eq!(map_php_version("*").unwrap(), None);
        assert!(matches!(
            map_php_version("8.0"),
            Err(BuilderError::RuntimeNotSupported { .. })
        ));
    }

    #[test]
    fn test_node_version_mapping() {
        assert_eq!(map_node_version("^10.15.0"), "10.15.0");
        assert_eq!(map_node_version("8.9.4"), "8.9.4");
        assert_eq!(map_node_version(">=8"), DEFAULT_NODE_VERSION);
        assert_eq!(map_node_version("10.x"), DEFAULT_NODE_VERSION);
        assert_eq!(map_node_version("*"), DEFAULT_NODE_VERSION);
    }

    #[test]
    fn test_runtime_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("runtime.txt"), "python-3.6.6\n").unwrap();
        std::fs::write(
            dir.path().join("system.properties"),
            "java.runtime.version=1.8.0_181\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"engines": {"node": "~12.16.1"}}"#,
        )
        .unwrap();

        assert_eq!(
            detect_runtime(dir.path(), Language::Python).unwrap().as_deref(),
            Some("python-3.6.6")
        );
        assert_eq!(
            detect_runtime(dir.path(), Language::JavaMaven).unwrap().as_deref(),
            Some("1.8")
        );
        assert_eq!(
            detect_runtime(dir.path(), Language::Nodejs).unwrap().as_deref(),
            Some("12.16.1")
        );
        assert_eq!(detect_runtime(dir.path(), Language::Go).unwrap(), None);
    }
}
