//! 记录转换：远端记录载体 -> 本地行
//!
//! 纯函数：不修改输入，对同一载体重复应用结果一致（幂等映射，无计数器
//! 等旁路状态）。各实体的 transform 由这里的字段读取函数组合而成。

use crate::fm::records::RecordEnvelope;
use serde_json::{Map, Value};

/// 同步簿记字段（所有本地实体共有）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStamp {
    /// FileMaker 内部记录 ID（本地幂等对账的唯一锚点）
    pub file_maker_record_id: String,
    /// FileMaker 修改版本号
    pub file_maker_mod_id: String,
    /// 本地创建时间（unix 毫秒）
    pub created_at: i64,
    /// 本地修改时间（unix 毫秒）
    pub modified_at: i64,
    /// 本地编辑标记（同步落库时恒为 false）
    pub edited: bool,
}

/// 从记录载体提取簿记字段
pub fn sync_stamp(env: &RecordEnvelope, now_ms: i64) -> SyncStamp {
    SyncStamp {
        file_maker_record_id: env.record_id.clone(),
        file_maker_mod_id: env.mod_id.clone(),
        created_at: now_ms,
        modified_at: now_ms,
        edited: false,
    }
}

/// 读取字符串字段（缺失时返回空串，数值字段转为字符串）
pub fn str_field(fields: &Map<String, Value>, name: &str) -> String {
    match fields.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// 读取整数字段（FileMaker 数值字段可能以字符串返回）
pub fn i64_field(fields: &Map<String, Value>, name: &str) -> i64 {
    match fields.get(name) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// 当前 unix 毫秒时间戳
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope() -> RecordEnvelope {
        RecordEnvelope {
            field_data: json!({
                "hubId": "H0001",
                "capacity": 120,
                "gradeLevel": "7",
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
            record_id: "4213".to_string(),
            mod_id: "6".to_string(),
        }
    }

    #[test]
    fn test_sync_stamp_is_idempotent() {
        let env = envelope();
        let a = sync_stamp(&env, 1_700_000_000_000);
        let b = sync_stamp(&env, 1_700_000_000_000);
        assert_eq!(a, b);
        assert_eq!(a.file_maker_record_id, "4213");
        assert_eq!(a.file_maker_mod_id, "6");
        assert!(!a.edited);
        // 输入未被修改
        assert_eq!(env.record_id, "4213");
    }

    #[test]
    fn test_field_readers_handle_missing_and_coerced_values() {
        let env = envelope();
        assert_eq!(str_field(&env.field_data, "hubId"), "H0001");
        assert_eq!(str_field(&env.field_data, "capacity"), "120");
        assert_eq!(str_field(&env.field_data, "missing"), "");
        assert_eq!(i64_field(&env.field_data, "capacity"), 120);
        assert_eq!(i64_field(&env.field_data, "gradeLevel"), 7);
        assert_eq!(i64_field(&env.field_data, "missing"), 0);
    }
}
