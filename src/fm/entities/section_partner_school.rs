//! section 与 partner school 的关联同步

use crate::fm::records::RecordEnvelope;
use crate::fm::sync::EntitySync;
use crate::fm::transform::{str_field, sync_stamp};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionPartnerSchoolLocal {
    pub id: String,
    #[serde(rename = "sectionId")]
    pub section_id: String,
    #[serde(rename = "schoolId")]
    pub school_id: String,
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

pub struct SectionPartnerSchoolSync;

#[async_trait]
impl EntitySync for SectionPartnerSchoolSync {
    type Local = SectionPartnerSchoolLocal;

    fn entity_name(&self) -> &'static str {
        "section_partner_school"
    }

    fn layout(&self) -> &'static str {
        "SectionPartnerSchools"
    }

    fn mod_date_field(&self) -> &'static str {
        "modifiedDate"
    }

    fn last_editor_field(&self) -> &'static str {
        "modifiedBy"
    }

    fn transform(&self, env: &RecordEnvelope, now_ms: i64) -> Result<SectionPartnerSchoolLocal> {
        let stamp = sync_stamp(env, now_ms);
        Ok(SectionPartnerSchoolLocal {
            id: Uuid::new_v4().to_string(),
            section_id: str_field(&env.field_data, "sectionId"),
            school_id: str_field(&env.field_data, "schoolId"),
            file_maker_record_id: stamp.file_maker_record_id,
            file_maker_mod_id: stamp.file_maker_mod_id,
            created_at: stamp.created_at,
            modified_at: stamp.modified_at,
            edited: stamp.edited,
        })
    }

    async fn init_schema(&self, db: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS section_partner_schools (
                id TEXT PRIMARY KEY,
                section_id TEXT NOT NULL DEFAULT '',
                school_id TEXT NOT NULL DEFAULT '',
                file_maker_record_id TEXT NOT NULL UNIQUE,
                file_maker_mod_id TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL DEFAULT 0,
                modified_at INTEGER NOT NULL DEFAULT 0,
                edited INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(db)
        .await
        .context("创建 section_partner_schools 表失败")?;
        Ok(())
    }

    async fn purge_all(&self, db: &Pool<Sqlite>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM section_partner_schools")
            .execute(db)
            .await
            .context("清空 section_partner_schools 表失败")?;
        Ok(result.rows_affected())
    }

    async fn insert_batch(
        &self,
        db: &Pool<Sqlite>,
        rows: &[SectionPartnerSchoolLocal],
    ) -> Result<()> {
        let mut tx = db.begin().await.context("开启事务失败")?;
        for row in rows {
            sqlx::query(
                "INSERT INTO section_partner_schools (id, section_id, school_id, \
                 file_maker_record_id, file_maker_mod_id, created_at, modified_at, edited) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&row.id)
            .bind(&row.section_id)
            .bind(&row.school_id)
            .bind(&row.file_maker_record_id)
            .bind(&row.file_maker_mod_id)
            .bind(row.created_at)
            .bind(row.modified_at)
            .bind(row.edited)
            .execute(&mut *tx)
            .await
            .context("插入 section_partner_school 记录失败")?;
        }
        tx.commit().await.context("提交事务失败")?;
        Ok(())
    }

    async fn upsert_batch(
        &self,
        db: &Pool<Sqlite>,
        rows: &[SectionPartnerSchoolLocal],
    ) -> Result<()> {
        let mut tx = db.begin().await.context("开启事务失败")?;
        for row in rows {
            sqlx::query(
                "INSERT INTO section_partner_schools (id, section_id, school_id, \
                 file_maker_record_id, file_maker_mod_id, created_at, modified_at, edited) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(file_maker_record_id) DO UPDATE SET \
                 section_id = excluded.section_id, \
                 school_id = excluded.school_id, \
                 file_maker_mod_id = excluded.file_maker_mod_id, \
                 modified_at = excluded.modified_at, \
                 edited = excluded.edited",
            )
            .bind(&row.id)
            .bind(&row.section_id)
            .bind(&row.school_id)
            .bind(&row.file_maker_record_id)
            .bind(&row.file_maker_mod_id)
            .bind(row.created_at)
            .bind(row.modified_at)
            .bind(row.edited)
            .execute(&mut *tx)
            .await
            .context("合并 section_partner_school 记录失败")?;
        }
        tx.commit().await.context("提交事务失败")?;
        Ok(())
    }
}
