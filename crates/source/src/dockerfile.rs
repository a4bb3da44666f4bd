//! Dockerfile 解析
//!
//! 处理注释、续行、`FROM` 之前的 `ARG`、多阶段构建，
//! 提取服务检测需要的端口、环境变量、构建参数和启动命令。
//! 未知指令与缺少 `FROM` 都视为不合规。

use std::collections::BTreeMap;
use std::path::Path;

use builder_core::{BuilderError, BuilderResult};

const KNOWN_INSTRUCTIONS: &[&str] = &[
    "ADD",
    "ARG",
    "CMD",
    "COPY",
    "ENTRYPOINT",
    "ENV",
    "EXPOSE",
    "FROM",
    "HEALTHCHECK",
    "LABEL",
    "MAINTAINER",
    "ONBUILD",
    "RUN",
    "SHELL",
    "STOPSIGNAL",
    "USER",
    "VOLUME",
    "WORKDIR",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposedPort {
    pub port: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Env(Vec<(String, String)>),
    Arg {
        name: String,
        default: Option<String>,
    },
    Expose(Vec<ExposedPort>),
    Cmd(String),
    Entrypoint(String),
    Volume(Vec<String>),
    /// 其余已知指令只保留原始参数
    Other {
        keyword: String,
        args: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub base: String,
    pub name: Option<String>,
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dockerfile {
    /// 第一个 `FROM` 之前声明的参数
    pub global_args: BTreeMap<String, Option<String>>,
    pub stages: Vec<Stage>,
}

impl Dockerfile {
    pub fn load(path: &Path) -> BuilderResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BuilderError::SpecificationViolation(format!(
                "读取 Dockerfile 失败 {}: {e}",
                path.display()
            ))
        })?;
        parse_dockerfile(&content)
    }

    /// 最终阶段，决定镜像的运行形态
    pub fn final_stage(&self) -> Option<&Stage> {
        self.stages.last()
    }

    pub fn base_images(&self) -> Vec<&str> {
        let stage_names: Vec<&str> = self.stages.iter().filter_map(|s| s.name.as_deref()).collect();
        self.stages
            .iter()
            .map(|s| s.base.as_str())
            .filter(|base| !base.eq_ignore_ascii_case("scratch") && !stage_names.contains(base))
            .collect()
    }

    pub fn exposed_ports(&self) -> Vec<ExposedPort> {
        let mut ports: Vec<ExposedPort> = Vec::new();
        for inst in self.final_instructions() {
            if let Instruction::Expose(list) = inst {
                for port in list {
                    if !ports.iter().any(|p| p.port == port.port) {
                        ports.push(port.clone());
                    }
                }
            }
        }
        ports
    }

    pub fn envs(&self) -> BTreeMap<String, String> {
        let mut envs = BTreeMap::new();
        for inst in self.final_instructions() {
            if let Instruction::Env(vars) = inst {
                envs.extend(vars.iter().cloned());
            }
        }
        envs
    }

    /// 全部阶段声明的构建参数
    pub fn args(&self) -> BTreeMap<String, Option<String>> {
        let mut args = self.global_args.clone();
        for stage in &self.stages {
            for inst in &stage.instructions {
                if let Instruction::Arg { name, default } = inst {
                    let entry = args.entry(name.clone()).or_insert(None);
                    if default.is_some() {
                        *entry = default.clone();
                    }
                }
            }
        }
        args
    }

    /// 启动命令：ENTRYPOINT 与 CMD 拼接
    pub fn command(&self) -> String {
        let mut entrypoint = None;
        let mut cmd = None;
        for inst in self.final_instructions() {
            match inst {
                Instruction::Entrypoint(value) => entrypoint = Some(value.as_str()),
                Instruction::Cmd(value) => cmd = Some(value.as_str()),
                _ => {}
            }
        }
        [entrypoint, cmd]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn volumes(&self) -> Vec<String> {
        self.final_instructions()
            .filter_map(|inst| match inst {
                Instruction::Volume(paths) => Some(paths.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn final_instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.final_stage()
            .into_iter()
            .flat_map(|stage| stage.instructions.iter())
    }
}

pub fn parse_dockerfile(content: &str) -> BuilderResult<Dockerfile> {
    let mut dockerfile = Dockerfile::default();

    for (line_num, line) in preprocess(content) {
        let (keyword, rest) = match line.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword.to_ascii_uppercase(), rest.trim()),
            None => (line.to_ascii_uppercase(), ""),
        };
        if !KNOWN_INSTRUCTIONS.contains(&keyword.as_str()) {
            return Err(violation(line_num, format!("未知指令 {keyword}")));
        }
        let args = tokenize(rest);

        if keyword == "FROM" {
            dockerfile.stages.push(parse_from(line_num, &args)?);
            continue;
        }

        let inst = parse_instruction(line_num, &keyword, rest, &args)?;
        match dockerfile.stages.last_mut() {
            Some(stage) => stage.instructions.push(inst),
            None => match inst {
                Instruction::Arg { name, default } => {
                    dockerfile.global_args.insert(name, default);
                }
                _ => {
                    return Err(violation(
                        line_num,
                        format!("{keyword} 之前必须先声明 FROM"),
                    ))
                }
            },
        }
    }

    if dockerfile.stages.is_empty() {
        return Err(BuilderError::SpecificationViolation(
            "Dockerfile 中缺少 FROM 指令".to_string(),
        ));
    }
    Ok(dockerfile)
}

fn parse_from(line_num: usize, args: &[String]) -> BuilderResult<Stage> {
    let mut args = args
        .iter()
        .filter(|arg| !arg.starts_with("--platform="))
        .map(String::as_str);
    let base = args
        .next()
        .ok_or_else(|| violation(line_num, "FROM 缺少镜像名称".to_string()))?;
    let name = match (args.next(), args.next()) {
        (Some(keyword), Some(name)) if keyword.eq_ignore_ascii_case("AS") => Some(name.to_string()),
        (Some(keyword), None) if keyword.eq_ignore_ascii_case("AS") => {
            return Err(violation(line_num, "FROM ... AS 缺少阶段名称".to_string()))
        }
        _ => None,
    };
    Ok(Stage {
        base: base.to_string(),
        name,
        instructions: Vec::new(),
    })
}

fn parse_instruction(
    line_num: usize,
    keyword: &str,
    raw: &str,
    args: &[String],
) -> BuilderResult<Instruction> {
    let inst = match keyword {
        "ENV" => Instruction::Env(parse_env(line_num, args)?),
        "ARG" => {
            let first = args
                .first()
                .ok_or_else(|| violation(line_num, "ARG 缺少参数名".to_string()))?;
            match first.split_once('=') {
                Some((name, default)) => Instruction::Arg {
                    name: name.to_string(),
                    default: Some(unquote(default)),
                },
                None => Instruction::Arg {
                    name: first.clone(),
                    default: None,
                },
            }
        }
        "EXPOSE" => Instruction::Expose(parse_expose(line_num, args)?),
        "CMD" => Instruction::Cmd(command_line(raw)),
        "ENTRYPOINT" => Instruction::Entrypoint(command_line(raw)),
        "VOLUME" => Instruction::Volume(match serde_json::from_str::<Vec<String>>(raw) {
            Ok(paths) => paths,
            Err(_) => args.iter().map(|p| unquote(p)).collect(),
        }),
        _ => Instruction::Other {
            keyword: keyword.to_string(),
            args: raw.to_string(),
        },
    };
    Ok(inst)
}

/// `ENV k=v k2=v2` 与 `ENV k v` 两种写法
fn parse_env(line_num: usize, args: &[String]) -> BuilderResult<Vec<(String, String)>> {
    let first = args
        .first()
        .ok_or_else(|| violation(line_num, "ENV 至少需要一个变量".to_string()))?;
    if first.contains('=') {
        return Ok(args
            .iter()
            .filter_map(|arg| arg.split_once('='))
            .map(|(key, value)| (key.to_string(), unquote(value)))
            .collect());
    }
    if args.len() < 2 {
        return Err(violation(line_num, format!("ENV {first} 缺少取值")));
    }
    let value = args[1..].iter().map(|v| unquote(v)).collect::<Vec<_>>().join(" ");
    Ok(vec![(first.clone(), value)])
}

fn parse_expose(line_num: usize, args: &[String]) -> BuilderResult<Vec<ExposedPort>> {
    args.iter()
        .filter(|arg| !arg.starts_with('$'))
        .map(|arg| {
            let (port, protocol) = arg.split_once('/').unwrap_or((arg.as_str(), "tcp"));
            let port = port
                .parse::<u16>()
                .map_err(|_| violation(line_num, format!("无效的端口号 {port}")))?;
            let protocol = protocol.to_ascii_lowercase();
            if protocol != "tcp" && protocol != "udp" {
                return Err(violation(line_num, format!("不支持的端口协议 {protocol}")));
            }
            Ok(ExposedPort { port, protocol })
        })
        .collect()
}

/// exec 形式转为以空格连接的命令行
fn command_line(raw: &str) -> String {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(parts) => parts.join(" "),
        Err(_) => raw.to_string(),
    }
}

fn violation(line: usize, message: String) -> BuilderError {
    BuilderError::SpecificationViolation(format!("Dockerfile 第 {line} 行: {message}"))
}

fn unquote(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}

/// 去掉注释与空行，合并以 `\` 结尾的续行，返回 (起始行号, 内容)
fn preprocess(content: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut start = 0;

    for (index, raw) in content.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if current.is_empty() {
            start = index + 1;
        } else {
            current.push(' ');
        }
        match trimmed.strip_suffix('\\') {
            Some(body) => current.push_str(body.trim_end()),
            None => {
                current.push_str(trimmed);
                lines.push((start, std::mem::take(&mut current)));
            }
        }
    }
    if !current.is_empty() {
        lines.push((start, current));
    }
    lines
}

/// 按空白切分参数，保留引号与 JSON 数组整体
fn tokenize(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;

    for c in s.chars() {
        match c {
            '"' | '\'' if depth == 0 => {
                match quote {
                    Some(q) if q == c => quote = None,
                    None => quote = Some(c),
                    _ => {}
                }
                current.push(c);
            }
            '[' if quote.is_none() => {
                depth += 1;
                current.push(c);
            }
            ']' if quote.is_none() && depth > 0 => {
                depth -= 1;
                current.push(c);
            }
            c if c.is_whitespace() && quote.is_none() && depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_stage_with_continuations() {
        let dockerfile = parse_dockerfile(
            r#"
# build stage
ARG GO_VERSION=1.21
FROM golang:${GO_VERSION} AS build
WORKDIR /src
RUN go build \
    -o /app \
    ./cmd/server

FROM alpine:3.19
COPY --from=build /app /app
ENV APP_ENV=prod LOG_LEVEL="debug"
ENV GREETING hello world
EXPOSE 8080 9090/udp
VOLUME ["/data"]
ENTRYPOINT ["/app"]
CMD ["--serve"]
"#,
        )
        .unwrap();

        assert_eq!(dockerfile.stages.len(), 2);
        assert_eq!(dockerfile.stages[0].name.as_deref(), Some("build"));
        assert_eq!(
            dockerfile.global_args.get("GO_VERSION"),
            Some(&Some("1.21".to_string()))
        );
        assert_eq!(dockerfile.base_images(), vec!["golang:${GO_VERSION}", "alpine:3.19"]);

        let ports = dockerfile.exposed_ports();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[1], ExposedPort { port: 9090, protocol: "udp".into() });

        let envs = dockerfile.envs();
        assert_eq!(envs["LOG_LEVEL"], "debug");
        assert_eq!(envs["GREETING"], "hello world");
        assert_eq!(dockerfile.volumes(), vec!["/data".to_string()]);
        assert_eq!(dockerfile.command(), "/app --serve");

        match &dockerfile.stages[0].instructions[1] {
            Instruction::Other { keyword, args } => {
                assert_eq!(keyword, "RUN");
                assert_eq!(args, "go build -o /app ./cmd/server");
            }
            other => panic!("unexpected instruction {other:?}"),
        }
    }

    #[test]
    fn test_stage_reference_not_a_base_image() {
        let dockerfile = parse_dockerfile(
            "FROM node:18 AS deps\nFROM deps AS build\nFROM scratch\nCOPY --from=build /a /a",
        )
        .unwrap();
        assert_eq!(dockerfile.base_images(), vec!["node:18"]);
    }

    #[test]
    fn test_fatal_errors() {
        assert!(matches!(
            parse_dockerfile("RUN echo hi"),
            Err(BuilderError::SpecificationViolation(_))
        ));
        assert!(matches!(
            parse_dockerfile("# only comments\n"),
            Err(BuilderError::SpecificationViolation(_))
        ));
        let err = parse_dockerfile("FROM alpine\nFETCH http://x\n").unwrap_err();
        assert!(err.to_string().contains("FETCH"));
        assert!(parse_dockerfile("FROM alpine\nEXPOSE http").is_err());
    }
}
