//! 同步编排层
//!
//! `EntitySync` 定义每种实体的同步契约（布局、查询字段、转换、落库），
//! `SyncEngine` 执行统一的同步流水线，`SyncRegistry` 跟踪后台运行状态。

pub mod engine;
pub mod status;

pub use engine::SyncEngine;
pub use status::{RunPhase, RunState, RunStatus, SyncRegistry};

use crate::fm::records::RecordEnvelope;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

/// 一次同步请求的选项
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// 增量起始日期（MMDDYYYY），None 表示全量
    pub date: Option<String>,
    /// 清空重建（删除本地全部记录后批量插入）
    pub purge: bool,
}

/// 同步请求受理回执（后台阶段开始前即返回）
#[derive(Debug, Clone, Serialize)]
pub struct SyncAccepted {
    pub status: &'static str,
    pub code: u16,
    #[serde(rename = "totalCount")]
    pub total_count: u64,
    pub message: String,
    #[serde(rename = "runId")]
    pub run_id: Uuid,
}

/// 每种实体的同步契约
///
/// 实现者只声明实体特有的部分：布局名、查询字段、记录转换和落库语句。
/// 分页、查询构造、清空/合并的选择都由引擎统一处理。
#[async_trait]
pub trait EntitySync: Send + Sync {
    /// 本地行类型
    type Local: Send + Sync;

    /// 实体名（日志、单飞保护、运行状态用）
    fn entity_name(&self) -> &'static str;

    /// FileMaker 布局名
    fn layout(&self) -> &'static str;

    /// 增量查询使用的修改日期字段
    fn mod_date_field(&self) -> &'static str;

    /// 反馈环排除子句使用的最后编辑者字段
    fn last_editor_field(&self) -> &'static str;

    /// 分页大小
    fn chunk_size(&self) -> u32 {
        2000
    }

    /// 远端记录载体 -> 本地行
    fn transform(&self, env: &RecordEnvelope, now_ms: i64) -> anyhow::Result<Self::Local>;

    /// 建表（幂等）
    async fn init_schema(&self, db: &Pool<Sqlite>) -> anyhow::Result<()>;

    /// 删除本地全部记录，返回删除行数
    async fn purge_all(&self, db: &Pool<Sqlite>) -> anyhow::Result<u64>;

    /// 批量插入（purge 模式）
    async fn insert_batch(&self, db: &Pool<Sqlite>, rows: &[Self::Local]) -> anyhow::Result<()>;

    /// 批量合并：按 file_maker_record_id 冲突时更新业务字段
    async fn upsert_batch(&self, db: &Pool<Sqlite>, rows: &[Self::Local]) -> anyhow::Result<()>;
}
