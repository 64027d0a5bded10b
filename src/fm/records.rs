//! Data API 记录载体类型

use serde::{Deserialize, Serialize};

/// 远端记录载体：字段数据 + FileMaker 内部记录 ID + 修改版本号
///
/// `record_id` 是 FileMaker 为记录分配的稳定内部 ID，与 fieldData 中的
/// 业务主键无关，本地对账以它为唯一锚点。`mod_id` 每次编辑单调递增。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEnvelope {
    #[serde(rename = "fieldData")]
    pub field_data: serde_json::Map<String, serde_json::Value>,
    #[serde(rename = "recordId")]
    pub record_id: String,
    #[serde(rename = "modId")]
    pub mod_id: String,
}

/// 查询结果统计信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataInfo {
    #[serde(rename = "foundCount", default)]
    pub found_count: u64,
    #[serde(rename = "returnedCount", default)]
    pub returned_count: u64,
    #[serde(rename = "totalRecordCount", default)]
    pub total_record_count: u64,
}

/// find 查询结果
#[derive(Debug, Clone, Default)]
pub struct FindResult {
    pub data: Vec<RecordEnvelope>,
    pub data_info: DataInfo,
}

impl FindResult {
    /// 空结果（FileMaker 对无匹配记录报错误码 401，客户端归一化为此值）
    pub fn empty() -> Self {
        Self::default()
    }
}
