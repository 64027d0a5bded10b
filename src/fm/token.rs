//! 会话 token 管理
//!
//! 每个客户端实例持有一个 `TokenManager`，缓存的 token 由互斥锁保护，
//! 并发检测到过期时只有一个调用者执行刷新。token 有效期自最近一次
//! 使用起滑动计算，每次成功使用都会刷新"最近使用"时间。

use crate::fm::config::FmConfig;
use crate::fm::error::FmError;
use crate::fm::transport::{FmRequest, FmTransport};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

struct CachedToken {
    token: String,
    last_used: Instant,
}

pub struct TokenManager {
    config: Arc<FmConfig>,
    transport: Arc<dyn FmTransport>,
    cached: Mutex<Option<CachedToken>>,
}

/// 日志输出用的脱敏 token（只保留前后各 4 个字符，绝不输出完整值）
pub fn mask_token(token: &str) -> String {
    // 按字符截取，token 含多字节字符时不能按字节切片
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}

impl TokenManager {
    pub fn new(config: Arc<FmConfig>, transport: Arc<dyn FmTransport>) -> Self {
        Self {
            config,
            transport,
            cached: Mutex::new(None),
        }
    }

    /// 获取一个有效 token：窗口内直接复用缓存，否则重新认证
    pub async fn get_valid_token(&self) -> Result<String, FmError> {
        let mut guard = self.cached.lock().await;
        if let Some(cached) = guard.as_mut() {
            if cached.last_used.elapsed() < self.config.token_validity {
                // 滑动窗口：每次成功使用都刷新"最近使用"时间
                cached.last_used = Instant::now();
                debug!(
                    "[TokenMgr] 复用缓存 token: {}，预计过期时间: {}",
                    mask_token(&cached.token),
                    self.expected_expiry()
                );
                return Ok(cached.token.clone());
            }
            info!("[TokenMgr] 缓存 token 已超过有效窗口，重新认证");
        }
        let token = self.authenticate().await?;
        *guard = Some(CachedToken {
            token: token.clone(),
            last_used: Instant::now(),
        });
        Ok(token)
    }

    /// 丢弃缓存 token（服务器拒绝时调用）
    pub async fn invalidate(&self) {
        let mut guard = self.cached.lock().await;
        *guard = None;
    }

    /// 认证：按配置的次数上限重试，失败间隔 2^attempt 秒指数退避
    pub async fn authenticate(&self) -> Result<String, FmError> {
        self.config.require_credentials()?;

        let attempts = self.config.auth_attempts.max(1);
        let mut last_err: Option<FmError> = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = Duration::from_secs(1u64 << attempt);
                warn!("[TokenMgr] 第 {} 次认证重试，退避 {:?}", attempt, backoff);
                tokio::time::sleep(backoff).await;
            }
            match self.authenticate_once().await {
                Ok(token) => {
                    info!(
                        "[TokenMgr] ✅ 已签发会话 token: {}，预计过期时间: {}",
                        mask_token(&token),
                        self.expected_expiry()
                    );
                    return Ok(token);
                }
                Err(e) => {
                    error!("[TokenMgr] 认证失败: {}", e);
                    last_err = Some(e);
                }
            }
        }
        Err(FmError::Auth(
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "未知错误".to_string()),
        ))
    }

    /// 按当前时刻推算的 token 过期时间（日志用）
    fn expected_expiry(&self) -> String {
        let expires_at = chrono::Utc::now()
            + chrono::Duration::from_std(self.config.token_validity)
                .unwrap_or_else(|_| chrono::Duration::zero());
        expires_at.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    /// 单次认证调用（POST sessions，Basic 认证）
    async fn authenticate_once(&self) -> Result<String, FmError> {
        let req = FmRequest::post("sessions")
            .json(serde_json::json!({}))
            .basic(&self.config.username, &self.config.password);
        let resp = self.transport.send(req).await?;

        if !(200..300).contains(&resp.status) {
            return Err(FmError::Auth(format!(
                "HTTP {}: {}",
                resp.status, resp.body
            )));
        }
        resp.body
            .pointer("/response/token")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| FmError::Auth(format!("响应中缺少 token: {}", resp.body)))
    }

    /// 以有效 token 执行操作
    ///
    /// 操作因 token 被拒绝失败时，丢弃缓存并重新认证后重试一次；
    /// 第二次仍被拒绝则不再重试。其他失败按与认证相同的次数上限
    /// 和退避策略重试后原样抛出。
    pub async fn run_authenticated<T, F, Fut>(&self, op: F) -> Result<T, FmError>
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = Result<T, FmError>>,
    {
        let attempts = self.config.auth_attempts.max(1);
        let mut reauthed = false;
        let mut attempt = 0u32;
        loop {
            let token = self.get_valid_token().await?;
            match op(token).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_unauthorized() && !reauthed => {
                    warn!("[TokenMgr] 操作因 token 被拒绝，重新认证后重试一次: {}", e);
                    self.invalidate().await;
                    reauthed = true;
                }
                Err(e) if e.is_unauthorized() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= attempts {
                        return Err(e);
                    }
                    let backoff = Duration::from_secs(1u64 << attempt);
                    warn!(
                        "[TokenMgr] 操作失败，{:?} 后重试（第 {}/{} 次）: {}",
                        backoff, attempt, attempts, e
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
