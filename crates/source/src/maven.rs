//! Maven 项目解析：pom 基本信息与多模块拆分

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use builder_core::{BuilderError, BuilderResult};
use roxmltree::{Document, Node};
use tracing::debug;

pub const MAVEN_OPTS_ENV: &str = "BUILD_MAVEN_CUSTOM_OPTS";
pub const MAVEN_GOALS_ENV: &str = "BUILD_MAVEN_CUSTOM_GOALS";
const SPRING_BOOT_PLUGIN: &str = "spring-boot-maven-plugin";
/// 模块嵌套深度上限，防止 pom 互相引用导致无限递归
const MAX_MODULE_DEPTH: usize = 8;

/// pom.xml 中与构建相关的字段
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PomInfo {
    pub artifact_id: String,
    pub version: String,
    pub name: String,
    pub packaging: String,
    pub modules: Vec<String>,
    pub final_name: Option<String>,
    pub spring_boot: bool,
}

impl PomInfo {
    pub fn load(path: &Path) -> BuilderResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| match e {
            BuilderError::SpecificationViolation(msg) => {
                BuilderError::SpecificationViolation(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    pub fn parse(content: &str) -> BuilderResult<Self> {
        let doc = Document::parse(content)
            .map_err(|e| BuilderError::SpecificationViolation(format!("pom.xml 格式错误: {e}")))?;
        let project = doc.root_element();

        let parent = child(project, "parent");
        let version = child_text(project, "version")
            .or_else(|| parent.and_then(|p| child_text(p, "version")))
            .unwrap_or_default();

        let modules = child(project, "modules")
            .map(|modules| {
                modules
                    .children()
                    .filter(|n| n.is_element() && n.tag_name().name() == "module")
                    .filter_map(|n| n.text())
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let build = child(project, "build");
        let plugin_final_name = build
            .and_then(|b| child(b, "plugins"))
            .and_then(|plugins| {
                plugins.children().find(|p| {
                    p.is_element()
                        && child_text(*p, "artifactId").as_deref() == Some(SPRING_BOOT_PLUGIN)
                })
            })
            .and_then(|plugin| child(plugin, "configuration"))
            .and_then(|config| child_text(config, "finalName"));
        let final_name = build
            .and_then(|b| child_text(b, "finalName"))
            .or(plugin_final_name);

        let spring_boot = project.descendants().any(|n| {
            n.is_element()
                && n.tag_name().name() == "artifactId"
                && n.text().is_some_and(|t| t.trim().starts_with("spring-boot"))
        });

        Ok(Self {
            artifact_id: child_text(project, "artifactId").unwrap_or_default(),
            version,
            name: child_text(project, "name").unwrap_or_default(),
            packaging: child_text(project, "packaging").unwrap_or_default(),
            modules,
            final_name,
            spring_boot,
        })
    }

    /// 可执行文件名（不含扩展名），解析 `${project.name}` 与 `${project.artifactId}`
    pub fn executable_name(&self) -> String {
        match &self.final_name {
            Some(name) => name
                .replace("${project.name}", &self.name)
                .replace("${project.artifactId}", &self.artifact_id)
                .replace("${project.version}", &self.version),
            None if !self.artifact_id.is_empty() && !self.version.is_empty() => {
                format!("{}-{}", self.artifact_id, self.version)
            }
            None => "*".to_string(),
        }
    }

    pub fn is_war(&self) -> bool {
        self.packaging.eq_ignore_ascii_case("war")
    }
}

/// 多模块项目中的一个可部署模块
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MavenModule {
    pub name: String,
    pub artifact_id: String,
    pub packaging: String,
    /// 相对仓库根目录的模块路径
    pub relative_path: String,
    pub executable: String,
    pub envs: BTreeMap<String, String>,
    pub procfile: String,
}

/// 列出根 pom 下全部可部署的叶子模块，单模块项目返回空列表
pub fn list_modules(root: &Path) -> BuilderResult<Vec<MavenModule>> {
    let pom_path = root.join("pom.xml");
    if !pom_path.is_file() {
        return Ok(Vec::new());
    }
    let pom = PomInfo::load(&pom_path)?;
    if pom.modules.is_empty() {
        return Ok(Vec::new());
    }

    let mut leaves = Vec::new();
    collect_modules(root, PathBuf::new(), &pom, 0, &mut leaves)?;
    debug!(count = leaves.len(), "解析 Maven 多模块完成");
    Ok(leaves)
}

fn collect_modules(
    root: &Path,
    relative: PathBuf,
    pom: &PomInfo,
    depth: usize,
    leaves: &mut Vec<MavenModule>,
) -> BuilderResult<()> {
    if depth > MAX_MODULE_DEPTH {
        return Err(BuilderError::SpecificationViolation(format!(
            "Maven 模块嵌套过深: {}",
            relative.display()
        )));
    }

    for module in &pom.modules {
        let module_relative = relative.join(module);
        let pom_path = root.join(&module_relative).join("pom.xml");
        if !pom_path.is_file() {
            debug!(module = %module_relative.display(), "模块缺少 pom.xml，跳过");
            continue;
        }
        let child_pom = PomInfo::load(&pom_path)?;
        if !child_pom.modules.is_empty() {
            collect_modules(root, module_relative, &child_pom, depth + 1, leaves)?;
            continue;
        }
        let packaging = child_pom.packaging.to_ascii_lowercase();
        if matches!(packaging.as_str(), "" | "jar" | "war") {
            leaves.push(build_module(&module_relative, &child_pom));
        }
    }
    Ok(())
}

fn build_module(relative: &Path, pom: &PomInfo) -> MavenModule {
    let relative_path = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/");
    let executable = pom.executable_name();

    let mut envs = BTreeMap::new();
    envs.insert(MAVEN_OPTS_ENV.to_string(), "-DskipTests".to_string());
    envs.insert(
        MAVEN_GOALS_ENV.to_string(),
        format!("clean install -pl {relative_path} -am"),
    );

    let procfile = if pom.is_war() {
        format!(
            "web: java $JAVA_OPTS -jar ./webapp-runner.jar --port $PORT ./{relative_path}/target/{executable}.war"
        )
    } else {
        format!("web: java $JAVA_OPTS -jar ./{relative_path}/target/{executable}.jar")
    };

    let name = if pom.name.is_empty() {
        pom.artifact_id.clone()
    } else {
        pom.name.clone()
    };

    MavenModule {
        name,
        artifact_id: pom.artifact_id.clone(),
        packaging: if pom.packaging.is_empty() {
            "jar".to_string()
        } else {
            pom.packaging.to_ascii_lowercase()
        },
        relative_path,
        executable,
        envs,
        procfile,
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    child(node, name)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
