use config::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

/// 应用程序配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 环境模式
    pub environment: Environment,
    /// 服务器地址和端口
    pub server: ServerConfig,
    /// 上游存储配置
    pub upstream: UpstreamConfig,
    /// 缓存刷新配置
    pub refresh: RefreshConfig,
}

/// 环境模式
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Testing,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            "testing" => Ok(Environment::Testing),
            _ => Err(format!("Unknown environment: {}", s)),
        }
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 服务器主机地址
    pub host: String,
    /// 服务器端口
    pub port: u16,
    /// 日志级别
    pub log_level: String,
    /// CORS允许的域名
    pub cors_allowed_origins: Vec<String>,
    /// 请求超时(秒)
    pub request_timeout_secs: u64,
}

/// 上游网关（选项存储、分段倍率存储）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// 基础URL
    pub base_url: String,
    /// 管理员访问令牌
    pub access_token: Option<String>,
    /// 管理员用户ID（New-Api-User 请求头）
    pub user_id: Option<String>,
    /// 超时时间(秒)
    pub timeout_secs: u64,
}

/// 缓存刷新配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// 刷新间隔(秒)，0表示不定期刷新
    pub interval_secs: u64,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        // 加载.env文件
        dotenv::dotenv().ok();

        let environment = env::var("APP_ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .parse::<Environment>()
            .map_err(ConfigError::Message)?;

        // 服务器配置
        let host = env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = parse_var("APP_PORT", 3000u16)?;
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let request_timeout_secs = parse_var("REQUEST_TIMEOUT_SECS", 30u64)?;

        // 上游配置
        let base_url = env::var("UPSTREAM_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:3000".to_string());
        if reqwest::Url::parse(&base_url).is_err() {
            return Err(ConfigError::Message(format!(
                "UPSTREAM_BASE_URL 不是有效的URL: {}",
                base_url
            )));
        }
        let access_token = non_empty_var("UPSTREAM_ACCESS_TOKEN");
        let user_id = non_empty_var("UPSTREAM_USER_ID");
        let timeout_secs = parse_var("UPSTREAM_TIMEOUT_SECS", 10u64)?;

        let interval_secs = parse_var("RATIO_REFRESH_INTERVAL_SECS", 60u64)?;

        let config = Self {
            environment,
            server: ServerConfig {
                host,
                port,
                log_level,
                cors_allowed_origins,
                request_timeout_secs,
            },
            upstream: UpstreamConfig {
                base_url,
                access_token,
                user_id,
                timeout_secs,
            },
            refresh: RefreshConfig { interval_secs },
        };
        config.socket_addr()?;

        Ok(config)
    }

    /// 获取Socket地址
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| {
                ConfigError::Message(format!(
                    "无效的监听地址 {}:{}: {}",
                    self.server.host, self.server.port, e
                ))
            })
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::Message(format!("环境变量 {} 无效 ({}): {}", key, raw, e))),
        Err(_) => Ok(default),
    }
}
