//! 错误类型定义
//!
//! 客户端层使用带类型的 `FmError`，编排层在其上使用 `anyhow` 附加上下文。

use thiserror::Error;

/// FileMaker 同步核心的错误分类
#[derive(Debug, Error)]
pub enum FmError {
    /// 缺少必要配置项（致命错误，不重试）
    #[error("缺少必要配置项: {0}")]
    Config(String),

    /// 认证失败（已按配置的次数上限重试后仍失败）
    #[error("FileMaker 认证失败: {0}")]
    Auth(String),

    /// 会话 token 被服务器拒绝（触发一次透明重新认证后重试）
    #[error("会话 token 无效或已过期: {0}")]
    Unauthorized(String),

    /// 目标布局不存在，附带可用布局列表便于排查
    #[error("布局 {layout} 不存在，可用布局: {available:?}")]
    LayoutNotFound {
        layout: String,
        available: Vec<String>,
    },

    /// 响应缺少 response 载荷或结构非法
    #[error("FileMaker 响应结构非法: {0}")]
    InvalidResponse(String),

    /// FileMaker 返回的业务错误码
    #[error("FileMaker 错误 {code}: {message}")]
    Api { code: String, message: String },

    /// 传输层错误（本层不自动重试）
    #[error("请求失败: {0}")]
    Transport(String),

    /// 非法的日期参数
    #[error("非法的日期参数: {0}（期望 MMDDYYYY 格式）")]
    InvalidDate(String),

    /// 同一实体已有同步任务在执行（单飞保护）
    #[error("实体 {0} 已有同步任务在执行")]
    SyncInProgress(String),
}

impl FmError {
    /// 是否为 token 被拒绝错误（run_authenticated 据此决定是否重新认证）
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, FmError::Unauthorized(_))
    }
}
