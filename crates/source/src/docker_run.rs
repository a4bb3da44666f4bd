//! 解析 `docker run ...` 命令行，用于以命令方式创建服务时的检测

use std::collections::BTreeMap;

use builder_core::models::ServicePort;
use builder_core::{BuilderError, BuilderResult};

/// 需要取值但不影响服务信息的选项
const VALUE_OPTIONS: &[&str] = &[
    "--name",
    "-w",
    "--workdir",
    "-u",
    "--user",
    "-h",
    "--hostname",
    "--network",
    "--net",
    "--restart",
    "-m",
    "--memory",
    "--cpus",
    "--entrypoint",
    "-l",
    "--label",
    "--env-file",
    "--add-host",
    "--dns",
    "--log-driver",
    "--log-opt",
    "--mount",
    "--device",
    "--ulimit",
    "--cap-add",
    "--cap-drop",
    "--link",
    "--expose",
    "--platform",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DockerRunCommand {
    pub image: String,
    pub envs: BTreeMap<String, String>,
    pub ports: Vec<ServicePort>,
    pub volumes: Vec<String>,
    pub memory: Option<String>,
    /// 镜像之后的命令与参数
    pub args: Vec<String>,
}

pub fn parse_docker_run(command: &str) -> BuilderResult<DockerRunCommand> {
    let tokens = shell_split(command)?;
    let skip = match tokens.iter().map(String::as_str).take(2).collect::<Vec<_>>()[..] {
        ["docker", "run"] => 2,
        ["run", ..] => 1,
        _ => return Err(BuilderError::invalid_params("命令必须以 docker run 开头")),
    };
    let mut iter = tokens.into_iter().skip(skip);

    let mut parsed = DockerRunCommand::default();
    while let Some(token) = iter.next() {
        if !token.starts_with('-') || token == "-" {
            parsed.image = token;
            parsed.args = iter.collect();
            break;
        }

        let (name, inline) = match token.split_once('=') {
            Some((name, value)) if name.starts_with("--") => (name.to_string(), Some(value.to_string())),
            _ => (token.clone(), None),
        };

        let takes_value = matches!(
            name.as_str(),
            "-e" | "--env" | "-p" | "--publish" | "-v" | "--volume"
        ) || VALUE_OPTIONS.contains(&name.as_str());
        if !takes_value {
            continue;
        }

        let value = match inline {
            Some(value) => value,
            None => iter.next().ok_or_else(|| {
                BuilderError::invalid_params(format!("选项 {name} 缺少取值"))
            })?,
        };

        match name.as_str() {
            "-e" | "--env" => {
                let (key, val) = value.split_once('=').unwrap_or((value.as_str(), ""));
                parsed.envs.insert(key.to_string(), val.to_string());
            }
            "-p" | "--publish" => parsed.ports.push(parse_publish(&value)?),
            "-v" | "--volume" => {
                let container_path = value.split(':').nth(1).unwrap_or(value.as_str());
                parsed.volumes.push(container_path.to_string());
            }
            "-m" | "--memory" => parsed.memory = Some(value),
            _ => {}
        }
    }

    if parsed.image.is_empty() {
        return Err(BuilderError::invalid_params("docker run 命令中缺少镜像名称"));
    }
    Ok(parsed)
}

/// `[ip:][host_port:]container_port[/protocol]`，只保留容器端口
fn parse_publish(value: &str) -> BuilderResult<ServicePort> {
    let (ports, protocol) = value.split_once('/').unwrap_or((value, "tcp"));
    let container = ports.rsplit(':').next().unwrap_or(ports);
    let container_port = container
        .parse::<u16>()
        .map_err(|_| BuilderError::invalid_params(format!("无效的端口映射: {value}")))?;
    let protocol = if protocol.eq_ignore_ascii_case("udp") {
        "udp"
    } else {
        "http"
    };
    Ok(ServicePort {
        container_port,
        protocol: protocol.to_string(),
    })
}

/// 按 shell 规则切分：支持单双引号与反斜杠续行
fn shell_split(command: &str) -> BuilderResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut has_token = false;
    let mut quote: Option<char> = None;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') => match chars.next() {
                Some(next @ ('"' | '\\' | '$')) => current.push(next),
                Some(next) => {
                    current.push('\\');
                    current.push(next);
                }
                None => current.push('\\'),
            },
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                has_token = true;
            }
            (None, '\\') => match chars.next() {
                Some('\n') | Some('\r') => {}
                Some(next) => {
                    current.push(next);
                    has_token = true;
                }
                None => {}
            },
            (None, c) if c.is_whitespace() => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            (None, c) => {
                current.push(c);
                has_token = true;
            }
        }
    }

    if quote.is_some() {
        return Err(BuilderError::invalid_params("docker run 命令中的引号未闭合"));
    }
    if has_token {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_command() {
        let cmd = parse_docker_run(
            "docker run -d --name web -e MODE=prod --env=\"GREETING=hello world\" \\\n  -p 8080:80 -p 127.0.0.1:53:53/udp -v /host/data:/data --rm nginx:1.25 nginx -g 'daemon off;'",
        )
        .unwrap();
        assert_eq!(cmd.image, "nginx:1.25");
        assert_eq!(cmd.envs["MODE"], "prod");
        assert_eq!(cmd.envs["GREETING"], "hello world");
        assert_eq!(cmd.ports, vec![ServicePort::http(80), ServicePort {
            container_port: 53,
            protocol: "udp".into()
        }]);
        assert_eq!(cmd.volumes, vec!["/data".to_string()]);
        assert_eq!(cmd.args, vec!["nginx", "-g", "daemon off;"]);
    }

    #[test]
    fn test_image_only() {
        let cmd = parse_docker_run("docker run redis").unwrap();
        assert_eq!(cmd.image, "redis");
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn test_invalid_commands() {
        assert!(parse_docker_run("docker ps").is_err());
        assert!(parse_docker_run("docker run -d").is_err());
        assert!(parse_docker_run("docker run -e").is_err());
        assert!(parse_docker_run("docker run 'nginx").is_err());
    }
}
