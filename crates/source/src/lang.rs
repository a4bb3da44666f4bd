//! 项目语言识别
//!
//! 按固定顺序依次检查工作树，第一个命中的规则决定语言。
//! 根目录存在 `katofile` 且声明了语言时，以声明为准。

use std::path::Path;

use builder_core::{BuilderError, BuilderResult, Language};
use tracing::debug;
use walkdir::WalkDir;

use crate::service_config::ServiceConfigFile;

const PYTHON_FILES: &[&str] = &["requirements.txt", "setup.py", "Pipfile"];
const POM_SUFFIXES: &[&str] = &["xml", "atom", "clj", "groovy", "rb", "scala", "yaml", "yml"];
const STATIC_FILES: &[&str] = &["index.html", "index.htm", "static.json"];
const GO_FILES: &[&str] = &[
    "go.mod",
    "Gopkg.lock",
    "Godeps/Godeps.json",
    "vendor/vendor.json",
    "glide.yaml",
];
const GRADLE_FILES: &[&str] = &["build.gradle", "gradlew", "settings.gradle"];

type Rule = (Language, fn(&Path) -> bool);

const RULES: &[Rule] = &[
    (Language::Dockerfile, |dir| dir.join("Dockerfile").is_file()),
    (Language::Python, |dir| any_file(dir, PYTHON_FILES)),
    (Language::Ruby, |dir| dir.join("Gemfile").is_file()),
    (Language::Php, |dir| {
        dir.join("composer.json").is_file() || find_within(dir, 2, |name| name == "index.php")
    }),
    (Language::JavaMaven, |dir| {
        POM_SUFFIXES
            .iter()
            .any(|suffix| dir.join(format!("pom.{suffix}")).is_file())
    }),
    (Language::JavaWar, |dir| has_extension(dir, "war")),
    (Language::JavaJar, |dir| {
        has_extension(dir, "jar") && dir.join("Procfile").is_file()
    }),
    (Language::NodejsStatic, |dir| {
        dir.join("package.json").is_file() && dir.join("nodestatic.json").is_file()
    }),
    (Language::Nodejs, |dir| dir.join("package.json").is_file()),
    (Language::Static, |dir| any_file(dir, STATIC_FILES)),
    (Language::Clojure, |dir| dir.join("project.clj").is_file()),
    (Language::Go, |dir| {
        any_file(dir, GO_FILES) || has_extension(&dir.join("src"), "go")
    }),
    (Language::Gradle, |dir| any_file(dir, GRADLE_FILES)),
    (Language::Grails, |dir| dir.join("grails-app").is_dir()),
    (Language::DotnetCore, |dir| {
        find_within(dir, 2, |name| name.ends_with(".sln") || name.ends_with(".csproj"))
    }),
];

/// 自动识别语言，没有规则命中时返回 `Language::None`
pub fn detect_language(dir: &Path) -> Language {
    let lang = RULES
        .iter()
        .find(|(_, rule)| rule(dir))
        .map(|(lang, _)| *lang)
        .unwrap_or(Language::None);
    debug!(dir = %dir.display(), language = %lang, "语言识别完成");
    lang
}

/// 先看 `katofile` 中的声明，再自动识别
pub fn detect_with_config(dir: &Path) -> BuilderResult<Language> {
    if let Some(config) = ServiceConfigFile::load(dir)? {
        if let Some(lang) = config.language() {
            debug!(language = %lang, "使用配置文件声明的语言");
            return Ok(lang);
        }
    }
    Ok(detect_language(dir))
}

/// 识别失败视为错误
pub fn require_language(dir: &Path) -> BuilderResult<Language> {
    match detect_with_config(dir)? {
        Language::None => Err(BuilderError::LanguageUnknown),
        lang => Ok(lang),
    }
}

fn any_file(dir: &Path, names: &[&str]) -> bool {
    names.iter().any(|name| dir.join(name).is_file())
}

fn has_extension(dir: &Path, extension: &str) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.filter_map(Result::ok).any(|entry| {
        let path = entry.path();
        path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
    })
}

fn find_within(dir: &Path, depth: usize, matches: impl Fn(&str) -> bool) -> bool {
    WalkDir::new(dir)
        .max_depth(depth)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
        })
        .filter_map(Result::ok)
        .any(|entry| entry.file_type().is_file() && matches(&entry.file_name().to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tree(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "").unwrap();
        }
        dir
    }

    #[test]
    fn test_rules_in_order() {
        let cases: &[(&[&str], Language)] = &[
            (&["Dockerfile", "requirements.txt"], Language::Dockerfile),
            (&["Pipfile"], Language::Python),
            (&["Gemfile"], Language::Ruby),
            (&["web/index.php"], Language::Php),
            (&["pom.xml"], Language::JavaMaven),
            (&["app.war", "app.jar"], Language::JavaWar),
            (&["app.jar", "Procfile"], Language::JavaJar),
            (&["app.jar", "package.json"], Language::Nodejs),
            (&["app.jar"], Language::None),
            (&["package.json", "nodestatic.json"], Language::NodejsStatic),
            (&["package.json"], Language::Nodejs),
            (&["index.html"], Language::Static),
            (&["project.clj"], Language::Clojure),
            (&["src/main.go"], Language::Go),
            (&["gradlew"], Language::Gradle),
            (&["grails-app/conf/app.yml"], Language::Grails),
            (&["App/App.csproj"], Language::DotnetCore),
            (&["README.md"], Language::None),
        ];
        for (files, expected) in cases {
            let dir = tree(files);
            assert_eq!(detect_language(dir.path()), *expected, "{files:?}");
        }
    }

    #[test]
    fn test_php_index_too_deep() {
        let dir = tree(&["a/b/index.php"]);
        assert_eq!(detect_language(dir.path()), Language::None);
    }

    #[test]
    fn test_unknown_language_is_error() {
        let dir = tree(&["README.md"]);
        assert!(matches!(
            require_language(dir.path()),
            Err(BuilderError::LanguageUnknown)
        ));
    }
}
