//! HTTP 传输层抽象
//!
//! 客户端与 token 管理只依赖 `FmTransport` 接口，默认实现基于 reqwest，
//! 测试中可以替换为内存实现而不经过网络。

use crate::fm::error::FmError;
use async_trait::async_trait;
use tracing::debug;

/// HTTP 方法（仅覆盖 Data API 用到的子集）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

/// 请求认证方式
#[derive(Debug, Clone)]
pub enum RequestAuth {
    /// Basic 认证（仅 sessions 接口使用）
    Basic { username: String, password: String },
    /// Bearer token
    Bearer(String),
}

/// 一次 Data API 请求（路径相对于数据库基础地址）
#[derive(Debug, Clone)]
pub struct FmRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub auth: Option<RequestAuth>,
}

impl FmRequest {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            auth: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, pairs: Vec<(String, String)>) -> Self {
        self.query = pairs;
        self
    }

    pub fn basic(mut self, username: &str, password: &str) -> Self {
        self.auth = Some(RequestAuth::Basic {
            username: username.to_string(),
            password: password.to_string(),
        });
        self
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.auth = Some(RequestAuth::Bearer(token.to_string()));
        self
    }
}

/// 响应：HTTP 状态码 + 解析后的 JSON body
#[derive(Debug, Clone)]
pub struct FmResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

/// 传输层接口
#[async_trait]
pub trait FmTransport: Send + Sync {
    async fn send(&self, req: FmRequest) -> Result<FmResponse, FmError>;
}

/// 基于 reqwest 的默认传输层
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl FmTransport for HttpTransport {
    async fn send(&self, req: FmRequest) -> Result<FmResponse, FmError> {
        let url = format!("{}/{}", self.base_url, req.path);
        debug!("[HTTP] {:?} {}", req.method, url);

        let mut builder = match req.method {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
            Method::Patch => self.http.patch(&url),
            Method::Delete => self.http.delete(&url),
        };
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        builder = builder.header("Content-Type", "application/json");
        match &req.auth {
            Some(RequestAuth::Basic { username, password }) => {
                builder = builder.basic_auth(username, Some(password));
            }
            Some(RequestAuth::Bearer(token)) => {
                builder = builder.bearer_auth(token);
            }
            None => {}
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FmError::Transport(format!("请求失败: {}", e)))?;
        let status = response.status().as_u16();

        // body 只能读取一次，先取 bytes 再解析
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FmError::Transport(format!("读取响应 body 失败: {}", e)))?;
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| {
                FmError::InvalidResponse(format!(
                    "响应不是合法 JSON: {}，原始响应: {}",
                    e,
                    String::from_utf8_lossy(&bytes)
                ))
            })?
        };

        Ok(FmResponse { status, body })
    }
}
