use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::BuilderError;

/// 源码项目语言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Dockerfile,
    JavaMaven,
    JavaJar,
    JavaWar,
    Python,
    Php,
    Nodejs,
    NodejsStatic,
    Static,
    Clojure,
    Go,
    Gradle,
    Grails,
    Ruby,
    DotnetCore,
    None,
}

impl Language {
    pub const ALL: [Language; 16] = [
        Language::Dockerfile,
        Language::JavaMaven,
        Language::JavaJar,
        Language::JavaWar,
        Language::Python,
        Language::Php,
        Language::Nodejs,
        Language::NodejsStatic,
        Language::Static,
        Language::Clojure,
        Language::Go,
        Language::Gradle,
        Language::Grails,
        Language::Ruby,
        Language::DotnetCore,
        Language::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Dockerfile => "dockerfile",
            Language::JavaMaven => "java-maven",
            Language::JavaJar => "java-jar",
            Language::JavaWar => "java-war",
            Language::Python => "python",
            Language::Php => "php",
            Language::Nodejs => "nodejs",
            Language::NodejsStatic => "nodejs-static",
            Language::Static => "static",
            Language::Clojure => "clojure",
            Language::Go => "go",
            Language::Gradle => "gradle",
            Language::Grails => "grails",
            Language::Ruby => "ruby",
            Language::DotnetCore => "dotnet-core",
            Language::None => "none",
        }
    }

    /// 宽松解析：忽略大小写，并接受 `Java-maven`、`Node.js`、`.NetCore`、`Golang` 等展示写法
    pub fn parse_lenient(value: &str) -> Option<Language> {
        let normalized: String = value
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | '.' | ' '))
            .collect();
        let lang = match normalized.as_str() {
            "dockerfile" | "docker" => Language::Dockerfile,
            "javamaven" | "maven" => Language::JavaMaven,
            "javajar" | "jar" => Language::JavaJar,
            "javawar" | "war" => Language::JavaWar,
            "python" => Language::Python,
            "php" => Language::Php,
            "nodejs" | "node" => Language::Nodejs,
            "nodejsstatic" | "nodestatic" => Language::NodejsStatic,
            "static" | "html" => Language::Static,
            "clojure" => Language::Clojure,
            "go" | "golang" => Language::Go,
            "gradle" | "javagradle" => Language::Gradle,
            "grails" => Language::Grails,
            "ruby" => Language::Ruby,
            "dotnetcore" | "netcore" | "dotnet" => Language::DotnetCore,
            "none" | "no" | "" => Language::None,
            _ => return None,
        };
        Some(lang)
    }

    pub fn is_java(&self) -> bool {
        matches!(
            self,
            Language::JavaMaven
                | Language::JavaJar
                | Language::JavaWar
                | Language::Gradle
                | Language::Grails
        )
    }

    /// 推荐的最小内存（MiB）
    pub fn memory_mb(&self) -> u32 {
        if self.is_java() {
            1024
        } else {
            512
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = BuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::parse_lenient(s)
            .ok_or_else(|| BuilderError::invalid_params(format!("不支持的语言: {s}")))
    }
}

impl Serialize for Language {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Language {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_forms() {
        assert_eq!("Java-maven".parse::<Language>().unwrap(), Language::JavaMaven);
        assert_eq!("Node.js".parse::<Language>().unwrap(), Language::Nodejs);
        assert_eq!(".NetCore".parse::<Language>().unwrap(), Language::DotnetCore);
        assert_eq!("Go".parse::<Language>().unwrap(), Language::Go);
        assert_eq!("NodeJSStatic".parse::<Language>().unwrap(), Language::NodejsStatic);
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn test_canonical_names_parse_back() {
        for lang in Language::ALL {
            assert_eq!(lang.as_str().parse::<Language>().unwrap(), lang);
        }
    }

    #[test]
    fn test_memory_recommendation() {
        assert_eq!(Language::JavaMaven.memory_mb(), 1024);
        assert_eq!(Language::JavaJar.memory_mb(), 1024);
        assert_eq!(Language::JavaWar.memory_mb(), 1024);
        assert_eq!(Language::Python.memory_mb(), 512);
        assert_eq!(Language::None.memory_mb(), 512);
    }
}
