//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `RELAY__*` 覆盖（双下划线表示嵌套，如 `RELAY__GATEWAY__UPSTREAM_BASE_URL=http://api:8000`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewaySection,
    pub auth: AuthSection,
    pub client: ClientSection,
}

/// [gateway] 段：监听地址与内部 Job Backend 地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    pub listen_addr: String,
    /// 内部后端根地址，中继目标为 `{upstream_base_url}/api/...`
    pub upstream_base_url: String,
    /// 仅限制建连；流本身可能持续很久，不设读超时
    pub connect_timeout_secs: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3000".to_string(),
            upstream_base_url: "http://127.0.0.1:8000".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

/// [auth] 段：会话 Cookie 与登录凭据
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub cookie_name: String,
    pub cookie_value: String,
    pub username: String,
    pub password: String,
    /// 未设置时根据 x-forwarded-proto 判断是否加 Secure
    pub secure_cookie: Option<bool>,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            cookie_name: "auth".to_string(),
            cookie_value: "true".to_string(),
            username: "demo".to_string(),
            password: "demo".to_string(),
            secure_cookie: None,
        }
    }
}

/// [client] 段：命令行客户端连接网关的参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub gateway_url: String,
    pub tenant_id: String,
    /// 预先签发的会话 Cookie 值；为空时客户端用 [auth] 凭据登录
    pub session_cookie: Option<String>,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:3000".to_string(),
            tenant_id: "demo".to_string(),
            session_cookie: None,
        }
    }
}

/// 从 config 目录加载配置，环境变量 RELAY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 RELAY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("RELAY")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
