//! 构建服务配置
//!
//! 配置按以下顺序加载，后者覆盖前者：
//! 1. 各配置段的默认值
//! 2. TOML 配置文件
//! 3. `BUILDER_` 前缀的环境变量（段与字段之间用 `__` 分隔，例如 `BUILDER_ENGINE__MAX_CONCURRENT`）
//! 4. 兼容旧部署的环境变量：`SOURCE_DIR`、`LOCAL_HUB_USER`、`LOCAL_HUB_PASS`、
//!    `DISABLE_IMAGE_CACHE`、`GITHUB_PROXY`

pub mod models;


pub use models::*;
