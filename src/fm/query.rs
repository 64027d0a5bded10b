//! 查询子句与各操作的参数构造器
//!
//! 每个操作允许的参数集合由对应构造器的字段静态决定，不在其中的参数
//! 无法到达线路；数值参数在边界处统一转为字符串（Data API 的查询参数
//! 均为字符串类型）。

use crate::fm::error::FmError;
use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// 一条查询子句：若干字段约束的合取，可带 omit 排除标记
///
/// 多条子句之间是析取关系；omit 子句从结果中剔除匹配记录。
#[derive(Debug, Clone, Default)]
pub struct QueryClause {
    fields: BTreeMap<String, String>,
    omit: bool,
}

impl QueryClause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.fields.insert(name.into(), pattern.into());
        self
    }

    pub fn omit(mut self) -> Self {
        self.omit = true;
        self
    }

    pub fn is_omit(&self) -> bool {
        self.omit
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|s| s.as_str())
    }

    /// 序列化为 Data API 查询对象（omit 在线路上是字符串 "true"）
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        for (name, pattern) in &self.fields {
            obj.insert(name.clone(), Value::String(pattern.clone()));
        }
        if self.omit {
            obj.insert("omit".to_string(), Value::String("true".to_string()));
        }
        Value::Object(obj)
    }
}

/// 排序字段
#[derive(Debug, Clone)]
pub struct SortOrder {
    pub field_name: String,
    pub descending: bool,
}

impl SortOrder {
    pub fn ascend(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            descending: false,
        }
    }

    pub fn descend(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            descending: true,
        }
    }

    fn to_value(&self) -> Value {
        json!({
            "fieldName": self.field_name,
            "sortOrder": if self.descending { "descend" } else { "ascend" },
        })
    }
}

/// find 操作的参数构造器（_find 请求体允许的全部键）
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub sort: Vec<SortOrder>,
    pub script: Option<String>,
    pub script_param: Option<String>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u32) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn sort(mut self, order: SortOrder) -> Self {
        self.sort.push(order);
        self
    }

    pub fn script(mut self, name: impl Into<String>, param: Option<String>) -> Self {
        self.script = Some(name.into());
        self.script_param = param;
        self
    }
}

/// 构造 _find 请求体：查询子句 + 选项，数值一律转为字符串
pub fn build_find_body(query: &[QueryClause], opts: &FindOptions) -> Value {
    let mut body = Map::new();
    body.insert(
        "query".to_string(),
        Value::Array(query.iter().map(|c| c.to_value()).collect()),
    );
    if let Some(limit) = opts.limit {
        body.insert("limit".to_string(), Value::String(limit.to_string()));
    }
    if let Some(offset) = opts.offset {
        body.insert("offset".to_string(), Value::String(offset.to_string()));
    }
    if !opts.sort.is_empty() {
        body.insert(
            "sort".to_string(),
            Value::Array(opts.sort.iter().map(|s| s.to_value()).collect()),
        );
    }
    if let Some(script) = &opts.script {
        body.insert("script".to_string(), Value::String(script.clone()));
    }
    if let Some(param) = &opts.script_param {
        body.insert("script.param".to_string(), Value::String(param.clone()));
    }
    Value::Object(body)
}

/// 列表（GET records）操作的查询参数：键名带下划线前缀
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u32) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = Vec::new();
        if let Some(limit) = self.limit {
            query.push(("_limit".to_string(), limit.to_string()));
        }
        if let Some(offset) = self.offset {
            query.push(("_offset".to_string(), offset.to_string()));
        }
        query
    }
}

/// 将 MMDDYYYY 格式的日期转换为 FileMaker 查询用的 MM/DD/YYYY
pub fn format_query_date(mmddyyyy: &str) -> Result<String, FmError> {
    if mmddyyyy.len() != 8 {
        return Err(FmError::InvalidDate(mmddyyyy.to_string()));
    }
    let date = NaiveDate::parse_from_str(mmddyyyy, "%m%d%Y")
        .map_err(|_| FmError::InvalidDate(mmddyyyy.to_string()))?;
    Ok(date.format("%m/%d/%Y").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_omit_serializes_as_string_true() {
        let clause = QueryClause::new().field("modifiedBy", "=sync_service").omit();
        let value = clause.to_value();
        assert_eq!(value["modifiedBy"], "=sync_service");
        assert_eq!(value["omit"], "true");

        let plain = QueryClause::new().field("hubId", "H0001").to_value();
        assert!(plain.get("omit").is_none());
    }

    #[test]
    fn test_find_body_contains_only_allowed_keys() {
        let query = vec![QueryClause::new().field("modifiedDate", ">=01/01/2026")];
        let opts = FindOptions::new()
            .limit(1000)
            .offset(2001)
            .sort(SortOrder::ascend("hubName"));
        let body = build_find_body(&query, &opts);
        let obj = body.as_object().expect("请求体应为 JSON 对象");

        let mut keys: Vec<&str> = obj.keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["limit", "offset", "query", "sort"]);
        // 数值在边界处转为字符串
        assert_eq!(body["limit"], "1000");
        assert_eq!(body["offset"], "2001");
        assert_eq!(body["sort"][0]["sortOrder"], "ascend");
    }

    #[test]
    fn test_list_params_use_underscore_keys() {
        let query = ListParams::new().limit(50).offset(101).to_query();
        assert_eq!(
            query,
            vec![
                ("_limit".to_string(), "50".to_string()),
                ("_offset".to_string(), "101".to_string()),
            ]
        );
    }

    #[test]
    fn test_format_query_date() {
        assert_eq!(format_query_date("06152026").unwrap(), "06/15/2026");
        assert!(matches!(
            format_query_date("2026-06-15"),
            Err(FmError::InvalidDate(_))
        ));
        assert!(matches!(
            format_query_date("13402026"),
            Err(FmError::InvalidDate(_))
        ));
    }
}
