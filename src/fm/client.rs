//! FileMaker Data API 客户端
//!
//! 所有业务操作都经过 `run_authenticated` 执行：token 获取、过期刷新、
//! 被拒绝后的一次透明重新认证对调用方不可见。响应解析集中在
//! `parse_data_api_response`，错误码在此处归一化为类型化错误。

use crate::fm::config::FmConfig;
use crate::fm::error::FmError;
use crate::fm::query::{build_find_body, FindOptions, ListParams, QueryClause};
use crate::fm::records::{DataInfo, FindResult, RecordEnvelope};
use crate::fm::token::TokenManager;
use crate::fm::transport::{FmRequest, FmTransport, HttpTransport};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

/// FileMaker 错误码：token 无效
const FM_CODE_INVALID_TOKEN: &str = "952";
/// FileMaker 错误码：无匹配记录（find 归一化为空结果）
const FM_CODE_NO_MATCH: &str = "401";
/// FileMaker 错误码：记录不存在（按 ID 读取归一化为 None）
const FM_CODE_RECORD_MISSING: &str = "101";

pub struct FmClient {
    config: Arc<FmConfig>,
    transport: Arc<dyn FmTransport>,
    tokens: TokenManager,
}

impl FmClient {
    /// 基于 reqwest 传输层创建客户端
    pub fn new(config: Arc<FmConfig>) -> Self {
        let transport: Arc<dyn FmTransport> = Arc::new(HttpTransport::new(config.base_url()));
        Self::with_transport(config, transport)
    }

    /// 注入自定义传输层（测试用）
    pub fn with_transport(config: Arc<FmConfig>, transport: Arc<dyn FmTransport>) -> Self {
        let tokens = TokenManager::new(config.clone(), transport.clone());
        Self {
            config,
            transport,
            tokens,
        }
    }

    /// 反馈环排除子句使用的服务账号标识
    pub fn service_account(&self) -> &str {
        &self.config.service_account
    }

    /// 以有效 token 发送请求并解析响应载荷
    async fn call(&self, req: FmRequest, op_name: &str) -> Result<Value, FmError> {
        let transport = self.transport.clone();
        self.tokens
            .run_authenticated(move |token| {
                let req = req.clone().bearer(&token);
                let transport = transport.clone();
                async move {
                    let resp = transport.send(req.clone()).await?;
                    parse_data_api_response(&req, resp.status, &resp.body)
                }
            })
            .await
            .map_err(|e| {
                error!("[FmClient] ❌ {} 失败: {}", op_name, e);
                e
            })
    }

    /// 在布局上执行 find 查询
    ///
    /// FileMaker 对无匹配记录返回错误码 401，这里归一化为空结果，
    /// 调用方无需区分"没有记录"和"查到零条"。
    pub async fn find(
        &self,
        layout: &str,
        query: &[QueryClause],
        opts: &FindOptions,
    ) -> Result<FindResult, FmError> {
        let body = build_find_body(query, opts);
        debug!("[FmClient] 📡 find {} 请求体: {}", layout, body);
        let req = FmRequest::post(format!("layouts/{}/_find", layout)).json(body);
        match self.call(req, &format!("find {}", layout)).await {
            Ok(payload) => parse_find_payload(&payload),
            Err(FmError::Api { code, .. }) if code == FM_CODE_NO_MATCH => {
                Ok(FindResult::empty())
            }
            Err(e) => Err(e),
        }
    }

    /// 创建记录，返回 (recordId, modId)
    pub async fn create(
        &self,
        layout: &str,
        field_data: Value,
    ) -> Result<(String, String), FmError> {
        let req = FmRequest::post(format!("layouts/{}/records", layout))
            .json(serde_json::json!({ "fieldData": field_data }));
        let payload = self.call(req, &format!("create {}", layout)).await?;
        let record_id = str_at(&payload, "/recordId")?;
        let mod_id = str_at(&payload, "/modId")?;
        info!("[FmClient] ✅ 已创建 {} 记录 recordId={}", layout, record_id);
        Ok((record_id, mod_id))
    }

    /// 编辑记录，可选带 modId 做乐观并发检查，返回新 modId
    pub async fn edit(
        &self,
        layout: &str,
        record_id: &str,
        field_data: Value,
        mod_id: Option<&str>,
    ) -> Result<String, FmError> {
        let mut body = serde_json::json!({ "fieldData": field_data });
        if let Some(mod_id) = mod_id {
            body["modId"] = Value::String(mod_id.to_string());
        }
        let req = FmRequest::patch(format!("layouts/{}/records/{}", layout, record_id)).json(body);
        let payload = self.call(req, &format!("edit {}", layout)).await?;
        str_at(&payload, "/modId")
    }

    /// 删除记录
    pub async fn delete(&self, layout: &str, record_id: &str) -> Result<(), FmError> {
        let req = FmRequest::delete(format!("layouts/{}/records/{}", layout, record_id));
        self.call(req, &format!("delete {}", layout)).await?;
        Ok(())
    }

    /// 按 FileMaker 内部 ID 读取单条记录（不存在时返回 None）
    pub async fn get_record(
        &self,
        layout: &str,
        record_id: &str,
    ) -> Result<Option<RecordEnvelope>, FmError> {
        let req = FmRequest::get(format!("layouts/{}/records/{}", layout, record_id));
        match self.call(req, &format!("get_record {}", layout)).await {
            Ok(payload) => {
                let result = parse_find_payload(&payload)?;
                Ok(result.data.into_iter().next())
            }
            Err(FmError::Api { code, .. })
                if code == FM_CODE_NO_MATCH || code == FM_CODE_RECORD_MISSING =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// 列出布局记录（分页参数走查询字符串）
    pub async fn list_records(
        &self,
        layout: &str,
        params: &ListParams,
    ) -> Result<FindResult, FmError> {
        let req = FmRequest::get(format!("layouts/{}/records", layout)).query(params.to_query());
        let payload = self.call(req, &format!("list_records {}", layout)).await?;
        parse_find_payload(&payload)
    }

    /// 数据库可用布局名列表（文件夹结构展平）
    pub async fn layouts(&self) -> Result<Vec<String>, FmError> {
        let payload = self.call(FmRequest::get("layouts"), "layouts").await?;
        Ok(collect_names(
            payload.pointer("/layouts"),
            "folderLayoutNames",
        ))
    }

    /// 数据库可用脚本名列表（文件夹结构展平）
    pub async fn scripts(&self) -> Result<Vec<String>, FmError> {
        let payload = self.call(FmRequest::get("scripts"), "scripts").await?;
        Ok(collect_names(
            payload.pointer("/scripts"),
            "folderScriptNames",
        ))
    }
}

/// 解析 Data API 响应，归一化错误
///
/// token 被拒绝（HTTP 401 或错误码 952）映射为 `Unauthorized`，其余
/// 非零错误码映射为 `Api`。失败时完整记录请求路径、方法、状态码、
/// 请求体和响应体，便于排查。
fn parse_data_api_response(
    req: &FmRequest,
    status: u16,
    body: &Value,
) -> Result<Value, FmError> {
    let (code, message) = first_message(body);

    if status == 401 || code.as_deref() == Some(FM_CODE_INVALID_TOKEN) {
        return Err(FmError::Unauthorized(format!(
            "HTTP {} code {:?}",
            status,
            code.as_deref().unwrap_or("-")
        )));
    }

    let is_ok = (200..300).contains(&status) && code.as_deref().map(|c| c == "0").unwrap_or(false);
    if !is_ok {
        let request_body = req.body.as_ref().unwrap_or(&Value::Null);
        error!(
            "[FmClient] 请求失败 {:?} {} 状态码={} 请求体={} 响应体={}",
            req.method, req.path, status, request_body, body
        );
        return match code {
            Some(code) => Err(FmError::Api {
                code,
                message: message.unwrap_or_default(),
            }),
            None => Err(FmError::Transport(format!("HTTP {}: {}", status, body))),
        };
    }

    body.get("response")
        .cloned()
        .ok_or_else(|| FmError::InvalidResponse(format!("响应缺少 response 载荷: {}", body)))
}

/// 读取 messages[0] 的错误码和消息
fn first_message(body: &Value) -> (Option<String>, Option<String>) {
    let code = body
        .pointer("/messages/0/code")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let message = body
        .pointer("/messages/0/message")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    (code, message)
}

/// 从 response 载荷解析记录数组和统计信息
fn parse_find_payload(payload: &Value) -> Result<FindResult, FmError> {
    let data: Vec<RecordEnvelope> = match payload.get("data") {
        Some(data) => serde_json::from_value(data.clone())
            .map_err(|e| FmError::InvalidResponse(format!("记录数组解析失败: {}", e)))?,
        None => Vec::new(),
    };
    let data_info: DataInfo = match payload.get("dataInfo") {
        Some(info) => serde_json::from_value(info.clone())
            .map_err(|e| FmError::InvalidResponse(format!("dataInfo 解析失败: {}", e)))?,
        None => DataInfo::default(),
    };
    Ok(FindResult { data, data_info })
}

/// 展平布局/脚本列表的文件夹结构，收集全部名称
fn collect_names(items: Option<&Value>, folder_key: &str) -> Vec<String> {
    let mut names = Vec::new();
    let Some(items) = items.and_then(|v| v.as_array()) else {
        return names;
    };
    for item in items {
        if let Some(name) = item.get("name").and_then(|v| v.as_str()) {
            names.push(name.to_string());
        }
        if let Some(children) = item.get(folder_key) {
            names.extend(collect_names(Some(children), folder_key));
        }
    }
    names
}

fn str_at(payload: &Value, pointer: &str) -> Result<String, FmError> {
    payload
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| FmError::InvalidResponse(format!("响应缺少 {} 字段: {}", pointer, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fm::transport::FmResponse;
    use async_trait::async_trait;
    use serde_json::json;

    /// 固定应答的传输层：sessions 返回假 token，其余请求返回预设响应
    struct CannedTransport {
        response: FmResponse,
    }

    impl CannedTransport {
        fn client(status: u16, body: Value) -> FmClient {
            let config = Arc::new(FmConfig::new("https://fm.test", "school", "api", "secret"));
            FmClient::with_transport(
                config,
                Arc::new(Self {
                    response: FmResponse { status, body },
                }),
            )
        }
    }

    #[async_trait]
    impl FmTransport for CannedTransport {
        async fn send(&self, req: FmRequest) -> Result<FmResponse, FmError> {
            if req.path == "sessions" {
                return Ok(FmResponse {
                    status: 200,
                    body: json!({
                        "response": { "token": "canned-token" },
                        "messages": [{ "code": "0", "message": "OK" }],
                    }),
                });
            }
            Ok(self.response.clone())
        }
    }

    fn ok_body(response: Value) -> Value {
        json!({
            "response": response,
            "messages": [{ "code": "0", "message": "OK" }],
        })
    }

    #[tokio::test]
    async fn test_missing_response_payload_is_invalid() {
        let client = CannedTransport::client(200, json!({ "messages": [{ "code": "0" }] }));
        let err = client
            .find("Hubs", &[], &FindOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FmError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_no_match_code_yields_empty_find() {
        let client = CannedTransport::client(
            500,
            json!({
                "messages": [{ "code": "401", "message": "No records match the request" }],
                "response": {},
            }),
        );
        let result = client.find("Hubs", &[], &FindOptions::new()).await.unwrap();
        assert!(result.data.is_empty());
        assert_eq!(result.data_info.found_count, 0);
    }

    #[tokio::test]
    async fn test_api_error_carries_code_and_message() {
        let client = CannedTransport::client(
            500,
            json!({
                "messages": [{ "code": "105", "message": "Layout is missing" }],
                "response": {},
            }),
        );
        let err = client.find("Nope", &[], &FindOptions::new()).await.unwrap_err();
        match err {
            FmError::Api { code, message } => {
                assert_eq!(code, "105");
                assert_eq!(message, "Layout is missing");
            }
            other => panic!("期望 Api 错误，实际为 {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_layouts_flatten_folders() {
        let client = CannedTransport::client(
            200,
            ok_body(json!({
                "layouts": [
                    { "name": "Hubs" },
                    {
                        "name": "同步",
                        "isFolder": true,
                        "folderLayoutNames": [
                            { "name": "Sections" },
                            { "name": "Students" },
                        ],
                    },
                ],
            })),
        );
        let layouts = client.layouts().await.unwrap();
        assert_eq!(layouts, vec!["Hubs", "同步", "Sections", "Students"]);
    }

    #[tokio::test]
    async fn test_get_record_missing_is_none() {
        let client = CannedTransport::client(
            500,
            json!({
                "messages": [{ "code": "101", "message": "Record is missing" }],
                "response": {},
            }),
        );
        let record = client.get_record("Hubs", "99999").await.unwrap();
        assert!(record.is_none());
    }
}
