//! 按语言检查项目是否满足构建约定

use std::path::Path;

use builder_core::models::CheckErrorInfo;
use builder_core::Language;

use crate::maven::PomInfo;

/// 返回全部问题，不合规项会阻止构建，建议项只做提示
pub fn check_specification(dir: &Path, lang: Language) -> Vec<CheckErrorInfo> {
    let mut issues = Vec::new();
    match lang {
        Language::JavaJar => check_procfile(dir, true, &mut issues),
        Language::JavaMaven => {
            check_procfile(dir, false, &mut issues);
            check_maven_packaging(dir, &mut issues);
        }
        Language::Php => {
            if dir.join("composer.json").is_file() && !dir.join("composer.lock").is_file() {
                issues.push(CheckErrorInfo::fatal(
                    "缺少 composer.lock 文件",
                    "请在本地执行 composer install 并提交生成的 composer.lock",
                ));
            }
        }
        Language::Nodejs | Language::NodejsStatic => {
            if !dir.join("yarn.lock").is_file() && !dir.join("package-lock.json").is_file() {
                issues.push(CheckErrorInfo::fatal(
                    "缺少 yarn.lock 或 package-lock.json 文件",
                    "请在本地执行 npm install 或 yarn 并提交生成的锁文件",
                ));
            }
        }
        _ => {}
    }
    issues
}

fn check_procfile(dir: &Path, required: bool, issues: &mut Vec<CheckErrorInfo>) {
    let Ok(content) = std::fs::read_to_string(dir.join("Procfile")) else {
        let info = "缺少 Procfile 文件";
        let advice = "请在代码根目录添加 Procfile，例如: web: java $JAVA_OPTS -jar ./app.jar";
        issues.push(if required {
            CheckErrorInfo::fatal(info, advice)
        } else {
            CheckErrorInfo::advice(info, advice)
        });
        return;
    };

    if !procfile_is_valid(&content) {
        issues.push(CheckErrorInfo::fatal(
            "Procfile 格式不正确",
            "Procfile 需以 web: 开头并给出启动命令，例如: web: java -jar ./app.jar",
        ));
    }
}

/// 第一行以 `web:` 开头，并且至少包含两个以空白分隔的字段
pub fn procfile_is_valid(content: &str) -> bool {
    let Some(line) = content.lines().find(|line| !line.trim().is_empty()) else {
        return false;
    };
    let mut fields = line.split_whitespace();
    let first = fields.next().unwrap_or_default();
    if first == "web:" {
        return fields.next().is_some();
    }
    // `web:java -jar app.jar` 形式
    first.starts_with("web:") && first.len() > 4 && fields.next().is_some()
}

fn check_maven_packaging(dir: &Path, issues: &mut Vec<CheckErrorInfo>) {
    let pom_path = dir.join("pom.xml");
    if !pom_path.is_file() {
        return;
    }
    let pom = match PomInfo::load(&pom_path) {
        Ok(pom) => pom,
        Err(e) => {
            issues.push(CheckErrorInfo::fatal(
                e.user_message(),
                "请检查 pom.xml 是否为合法的 XML",
            ));
            return;
        }
    };
    if !pom.modules.is_empty() || pom.spring_boot || pom.is_war() {
        return;
    }
    issues.push(CheckErrorInfo::fatal(
        "非 SpringBoot 项目必须以 war 方式打包",
        "请在 pom.xml 中设置 <packaging>war</packaging>，或引入 spring-boot-maven-plugin",
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_procfile_format() {
        assert!(procfile_is_valid("web: java -jar app.jar\n"));
        assert!(procfile_is_valid("\nweb: ./start"));
        assert!(!procfile_is_valid("web:"));
        assert!(!procfile_is_valid("worker: run"));
        assert!(!procfile_is_valid(""));
    }

    #[test]
    fn test_jar_requires_procfile() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.jar"), "").unwrap();
        let issues = check_specification(dir.path(), Language::JavaJar);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].is_fatal());

        fs::write(dir.path().join("Procfile"), "web: java -jar app.jar").unwrap();
        assert!(check_specification(dir.path(), Language::JavaJar).is_empty());
    }

    #[test]
    fn test_maven_rules() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("pom.xml"),
            "<project><artifactId>plain</artifactId><packaging>jar</packaging></project>",
        )
        .unwrap();
        let issues = check_specification(dir.path(), Language::JavaMaven);
        assert_eq!(issues.len(), 2);
        assert!(!issues[0].is_fatal());
        assert!(issues[1].is_fatal());

        fs::write(
            dir.path().join("pom.xml"),
            "<project><artifactId>plain</artifactId><packaging>war</packaging></project>",
        )
        .unwrap();
        let issues = check_specification(dir.path(), Language::JavaMaven);
        assert_eq!(issues.len(), 1);
        assert!(!issues[0].is_fatal());
    }

    #[test]
    fn test_lock_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("composer.json"), "{}").unwrap();
        assert_eq!(check_specification(dir.path(), Language::Php).len(), 1);
        fs::write(dir.path().join("composer.lock"), "{}").unwrap();
        assert!(check_specification(dir.path(), Language::Php).is_empty());

        fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(check_specification(dir.path(), Language::Nodejs).len(), 1);
        fs::write(dir.path().join("yarn.lock"), "").unwrap();
        assert!(check_specification(dir.path(), Language::Nodejs).is_empty());
    }
}
