//! 镜像仓库 HTTP 客户端
//!
//! - [`RegistryClient`]：Registry V2 接口（探测、标签、清单摘要、删除清单）
//! - [`TrustedRegistryClient`]：可信仓库的仓库管理接口
//!
//! 两者共用 [`HostResolver`]：按 HTTPS、跳过证书校验的 HTTPS、HTTP 的顺序探测仓库地址，
//! 探测结果按主机缓存。

pub mod auth;
mod client;
mod transport;
mod trusted;

pub use client::{RegistryClient, MANIFEST_V2};
pub use transport::{HostResolver, Transport};
pub use trusted::{TrustedRegistryClient, SHORT_DESCRIPTION_LIMIT};

use builder_core::BuilderError;

pub(crate) fn network_error(e: reqwest::Error) -> BuilderError {
    if e.is_timeout() {
        BuilderError::timeout("镜像仓库请求")
    } else {
        BuilderError::Network(e.to_string())
    }
}
