//! section（班级）同步

use crate::fm::records::RecordEnvelope;
use crate::fm::sync::EntitySync;
use crate::fm::transform::{str_field, sync_stamp};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionLocal {
    pub id: String,
    #[serde(rename = "sectionId")]
    pub section_id: String,
    #[serde(rename = "sectionName")]
    pub section_name: String,
    #[serde(rename = "hubId")]
    pub hub_id: String,
    pub term: String,
    #[serde(rename = "startDate")]
    pub start_date: String,
    #[serde(rename = "endDate")]
    pub end_date: String,
    pub instructor: String,
    #[serde(rename = "fileMakerRecordId")]
    pub file_maker_record_id: String,
    #[serde(rename = "fileMakerModId")]
    pub file_maker_mod_id: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "modifiedAt")]
    pub modified_at: i64,
    pub edited: bool,
}

pub struct SectionSync;

#[async_trait]
impl EntitySync for SectionSync {
    type Local = SectionLocal;

    fn entity_name(&self) -> &'static str {
        "section"
    }

    fn layout(&self) -> &'static str {
        "Sections"
    }

    fn mod_date_field(&self) -> &'static str {
        "modifiedDate"
    }

    fn last_editor_field(&self) -> &'static str {
        "modifiedBy"
    }

    fn transform(&self, env: &RecordEnvelope, now_ms: i64) -> Result<SectionLocal> {
        let stamp = sync_stamp(env, now_ms);
        Ok(SectionLocal {
            id: Uuid::new_v4().to_string(),
            section_id: str_field(&env.field_data, "sectionId"),
            section_name: str_field(&env.field_data, "sectionName"),
            hub_id: str_field(&env.field_data, "hubId"),
            term: str_field(&env.field_data, "term"),
            start_date: str_field(&env.field_data, "startDate"),
            end_date: str_field(&env.field_data, "endDate"),
            instructor: str_field(&env.field_data, "instructor"),
            file_maker_record_id: stamp.file_maker_record_id,
            file_maker_mod_id: stamp.file_maker_mod_id,
            created_at: stamp.created_at,
            modified_at: stamp.modified_at,
            edited: stamp.edited,
        })
    }

    async fn init_schema(&self, db: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sections (
                id TEXT PRIMARY KEY,
                section_id TEXT NOT NULL DEFAULT '',
                section_name TEXT NOT NULL DEFAULT '',
                hub_id TEXT NOT NULL DEFAULT '',
                term TEXT NOT NULL DEFAULT '',
                start_date TEXT NOT NULL DEFAULT '',
                end_date TEXT NOT NULL DEFAULT '',
                instructor TEXT NOT NULL DEFAULT '',
                file_maker_record_id TEXT NOT NULL UNIQUE,
                file_maker_mod_id TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL DEFAULT 0,
                modified_at INTEGER NOT NULL DEFAULT 0,
                edited INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(db)
        .await
        .context("创建 sections 表失败")?;
        Ok(())
    }

    async fn purge_all(&self, db: &Pool<Sqlite>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sections")
            .execute(db)
            .await
            .context("清空 sections 表失败")?;
        Ok(result.rows_affected())
    }

    async fn insert_batch(&self, db: &Pool<Sqlite>, rows: &[SectionLocal]) -> Result<()> {
        let mut tx = db.begin().await.context("开启事务失败")?;
        for row in rows {
            sqlx::query(
                "INSERT INTO sections (id, section_id, section_name, hub_id, term, \
                 start_date, end_date, instructor, \
                 file_maker_record_id, file_maker_mod_id, created_at, modified_at, edited) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&row.id)
            .bind(&row.section_id)
            .bind(&row.section_name)
            .bind(&row.hub_id)
            .bind(&row.term)
            .bind(&row.start_date)
            .bind(&row.end_date)
            .bind(&row.instructor)
            .bind(&row.file_maker_record_id)
            .bind(&row.file_maker_mod_id)
            .bind(row.created_at)
            .bind(row.modified_at)
            .bind(row.edited)
            .execute(&mut *tx)
            .await
            .context("插入 section 记录失败")?;
        }
        tx.commit().await.context("提交事务失败")?;
        Ok(())
    }

    async fn upsert_batch(&self, db: &Pool<Sqlite>, rows: &[SectionLocal]) -> Result<()> {
        let mut tx = db.begin().await.context("开启事务失败")?;
        for row in rows {
            sqlx::query(
                "INSERT INTO sections (id, section_id, section_name, hub_id, term, \
                 start_date, end_date, instructor, \
                 file_maker_record_id, file_maker_mod_id, created_at, modified_at, edited) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(file_maker_record_id) DO UPDATE SET \
                 section_id = excluded.section_id, \
                 section_name = excluded.section_name, \
                 hub_id = excluded.hub_id, \
                 term = excluded.term, \
                 start_date = excluded.start_date, \
                 end_date = excluded.end_date, \
                 instructor = excluded.instructor, \
                 file_maker_mod_id = excluded.file_maker_mod_id, \
                 modified_at = excluded.modified_at, \
                 edited = excluded.edited",
            )
            .bind(&row.id)
            .bind(&row.section_id)
            .bind(&row.section_name)
            .bind(&row.hub_id)
            .bind(&row.term)
            .bind(&row.start_date)
            .bind(&row.end_date)
            .bind(&row.instructor)
            .bind(&row.file_maker_record_id)
            .bind(&row.file_maker_mod_id)
            .bind(row.created_at)
            .bind(row.modified_at)
            .bind(row.edited)
            .execute(&mut *tx)
            .await
            .context("合并 section 记录失败")?;
        }
        tx.commit().await.context("提交事务失败")?;
        Ok(())
    }
}
