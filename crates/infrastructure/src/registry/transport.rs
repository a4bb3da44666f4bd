use std::collections::HashMap;
use std::time::Duration;

use builder_core::{BuilderError, BuilderResult};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Https,
    HttpsInsecure,
    Http,
}

impl Transport {
    pub const FALLBACK_ORDER: [Transport; 3] =
        [Transport::Https, Transport::HttpsInsecure, Transport::Http];

    pub fn scheme(&self) -> &'static str {
        match self {
            Transport::Https | Transport::HttpsInsecure => "https",
            Transport::Http => "http",
        }
    }
}

/// 仓库主机的访问方式探测与缓存
pub struct HostResolver {
    secure: reqwest::Client,
    insecure: reqwest::Client,
    resolved: RwLock<HashMap<String, Transport>>,
}

impl HostResolver {
    pub fn new(timeout: Duration) -> BuilderResult<Self> {
        let build = |insecure: bool| {
            reqwest::Client::builder()
                .timeout(timeout)
                .danger_accept_invalid_certs(insecure)
                .build()
                .map_err(|e| BuilderError::config_error(format!("创建HTTP客户端失败: {e}")))
        };
        Ok(Self {
            secure: build(false)?,
            insecure: build(true)?,
            resolved: RwLock::new(HashMap::new()),
        })
    }

    pub fn client(&self, transport: Transport) -> &reqwest::Client {
        match transport {
            Transport::HttpsInsecure => &self.insecure,
            _ => &self.secure,
        }
    }

    /// 返回主机可用的访问方式，首次访问时探测 `/v2/`
    ///
    /// 只要收到 HTTP 响应（包括 401）即视为可用。
    pub async fn resolve(&self, host: &str) -> BuilderResult<Transport> {
        if let Some(transport) = self.resolved.read().await.get(host) {
            return Ok(*transport);
        }

        for transport in Transport::FALLBACK_ORDER {
            let url = format!("{}://{host}/v2/", transport.scheme());
            match self.client(transport).get(&url).send().await {
                Ok(_) => {
                    info!(host, ?transport, "镜像仓库探测成功");
                    self.resolved
                        .write()
                        .await
                        .insert(host.to_string(), transport);
                    return Ok(transport);
                }
                Err(e) => debug!(host, ?transport, error = %e, "镜像仓库探测失败"),
            }
        }

        Err(BuilderError::Network(format!("无法连接镜像仓库 {host}")))
    }

    /// 连接中断后清除缓存，下次访问重新探测
    pub async fn forget(&self, host: &str) {
        self.resolved.write().await.remove(host);
    }
}
