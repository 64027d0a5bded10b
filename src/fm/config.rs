//! 环境配置
//!
//! 连接 FileMaker Data API 所需的全部配置。缺少任一凭据在首次使用时
//! 报 `FmError::Config`，属于致命错误，不会进入重试。

use crate::fm::error::FmError;
use std::time::Duration;

/// token 有效窗口（秒），自最近一次使用起滑动计算
pub const DEFAULT_TOKEN_VALIDITY_SECS: u64 = 12 * 60;

/// 认证尝试次数上限（1 表示不重试）
pub const DEFAULT_AUTH_ATTEMPTS: u32 = 1;

/// FileMaker Data API 连接配置
#[derive(Debug, Clone)]
pub struct FmConfig {
    /// 服务器地址，如 https://fm.example.org
    pub server: String,
    /// 数据库名
    pub database: String,
    /// 用户名
    pub username: String,
    /// 密码
    pub password: String,
    /// 服务账号标识（反馈环排除子句用，默认与用户名相同）
    pub service_account: String,
    /// token 有效窗口
    pub token_validity: Duration,
    /// 认证尝试次数上限
    pub auth_attempts: u32,
}

impl FmConfig {
    pub fn new(
        server: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let username = username.into();
        Self {
            server: server.into(),
            database: database.into(),
            service_account: username.clone(),
            username,
            password: password.into(),
            token_validity: Duration::from_secs(DEFAULT_TOKEN_VALIDITY_SECS),
            auth_attempts: DEFAULT_AUTH_ATTEMPTS,
        }
    }

    /// 从环境变量读取配置
    ///
    /// 必需：FM_SERVER、FM_DATABASE、FM_USERNAME、FM_PASSWORD；
    /// 可选：FM_SERVICE_ACCOUNT（默认与用户名相同）。
    pub fn from_env() -> Result<Self, FmError> {
        let server = require_env("FM_SERVER")?;
        let database = require_env("FM_DATABASE")?;
        let username = require_env("FM_USERNAME")?;
        let password = require_env("FM_PASSWORD")?;
        let service_account =
            std::env::var("FM_SERVICE_ACCOUNT").unwrap_or_else(|_| username.clone());
        Ok(Self {
            server,
            database,
            username,
            password,
            service_account,
            token_validity: Duration::from_secs(DEFAULT_TOKEN_VALIDITY_SECS),
            auth_attempts: DEFAULT_AUTH_ATTEMPTS,
        })
    }

    /// Data API 基础路径
    pub fn base_url(&self) -> String {
        format!(
            "{}/fmi/data/v1/databases/{}",
            self.server.trim_end_matches('/'),
            self.database
        )
    }

    /// 校验凭据齐全（authenticate 调用前检查）
    pub fn require_credentials(&self) -> Result<(), FmError> {
        for (name, value) in [
            ("FM_SERVER", &self.server),
            ("FM_DATABASE", &self.database),
            ("FM_USERNAME", &self.username),
            ("FM_PASSWORD", &self.password),
        ] {
            if value.is_empty() {
                return Err(FmError::Config(name.to_string()));
            }
        }
        Ok(())
    }
}

fn require_env(name: &str) -> Result<String, FmError> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(FmError::Config(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trims_trailing_slash() {
        let config = FmConfig::new("https://fm.test/", "school", "api", "secret");
        assert_eq!(
            config.base_url(),
            "https://fm.test/fmi/data/v1/databases/school"
        );
    }

    #[test]
    fn test_missing_credential_is_config_error() {
        let mut config = FmConfig::new("https://fm.test", "school", "api", "secret");
        config.password = String::new();
        let err = config.require_credentials().unwrap_err();
        assert!(matches!(err, FmError::Config(name) if name == "FM_PASSWORD"));
    }
}
