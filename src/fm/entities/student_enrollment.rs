//! student enrollment（选课记录）同步

use crate::fm::records::RecordEnvelope;
use crate::fm::sync::EntitySync;
use crate::fm::transform::{str_field, sync_stamp};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentEnrollmentLocal {
    pub id: String,
    #[serde(rename = "enrollmentId")]
    pub enrollment_id: String,
    #[serde(rename = "studentId")]
    pub student_id: String,
    #[serde(rename = "sectionId")]
    pub section_id: String,
    pub status: String,
    #[serde(rename = "enrolledDate")]
    pub enrolled_date: String,
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

pub struct StudentEnrollmentSync;

#[async_trait]
impl EntitySync for StudentEnrollmentSync {
    type Local = StudentEnrollmentLocal;

    fn entity_name(&self) -> &'static str {
        "student_enrollment"
    }

    fn layout(&self) -> &'static str {
        "StudentEnrollments"
    }

    fn mod_date_field(&self) -> &'static str {
        "modifiedDate"
    }

    fn last_editor_field(&self) -> &'static str {
        "modifiedBy"
    }

    fn chunk_size(&self) -> u32 {
        1000
    }

    fn transform(&self, env: &RecordEnvelope, now_ms: i64) -> Result<StudentEnrollmentLocal> {
        let stamp = sync_stamp(env, now_ms);
        Ok(StudentEnrollmentLocal {
            id: Uuid::new_v4().to_string(),
            enrollment_id: str_field(&env.field_data, "enrollmentId"),
            student_id: str_field(&env.field_data, "studentId"),
            section_id: str_field(&env.field_data, "sectionId"),
            status: str_field(&env.field_data, "status"),
            enrolled_date: str_field(&env.field_data, "enrolledDate"),
            file_maker_record_id: stamp.file_maker_record_id,
            file_maker_mod_id: stamp.file_maker_mod_id,
            created_at: stamp.created_at,
            modified_at: stamp.modified_at,
            edited: stamp.edited,
        })
    }

    async fn init_schema(&self, db: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS student_enrollments (
                id TEXT PRIMARY KEY,
                enrollment_id TEXT NOT NULL DEFAULT '',
                student_id TEXT NOT NULL DEFAULT '',
                section_id TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT '',
                enrolled_date TEXT NOT NULL DEFAULT '',
                file_maker_record_id TEXT NOT NULL UNIQUE,
                file_maker_mod_id TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL DEFAULT 0,
                modified_at INTEGER NOT NULL DEFAULT 0,
                edited INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(db)
        .await
        .context("创建 student_enrollments 表失败")?;
        Ok(())
    }

    async fn purge_all(&self, db: &Pool<Sqlite>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM student_enrollments")
            .execute(db)
            .await
            .context("清空 student_enrollments 表失败")?;
        Ok(result.rows_affected())
    }

    async fn insert_batch(
        &self,
        db: &Pool<Sqlite>,
        rows: &[StudentEnrollmentLocal],
    ) -> Result<()> {
        let mut tx = db.begin().await.context("开启事务失败")?;
        for row in rows {
            sqlx::query(
                "INSERT INTO student_enrollments (id, enrollment_id, student_id, section_id, \
                 status, enrolled_date, \
                 file_maker_record_id, file_maker_mod_id, created_at, modified_at, edited) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&row.id)
            .bind(&row.enrollment_id)
            .bind(&row.student_id)
            .bind(&row.section_id)
            .bind(&row.status)
            .bind(&row.enrolled_date)
            .bind(&row.file_maker_record_id)
            .bind(&row.file_maker_mod_id)
            .bind(row.created_at)
            .bind(row.modified_at)
            .bind(row.edited)
            .execute(&mut *tx)
            .await
            .context("插入 student_enrollment 记录失败")?;
        }
        tx.commit().await.context("提交事务失败")?;
        Ok(())
    }

    async fn upsert_batch(
        &self,
        db: &Pool<Sqlite>,
        rows: &[StudentEnrollmentLocal],
    ) -> Result<()> {
        let mut tx = db.begin().await.context("开启事务失败")?;
        for row in rows {
            sqlx::query(
                "INSERT INTO student_enrollments (id, enrollment_id, student_id, section_id, \
                 status, enrolled_date, \
                 file_maker_record_id, file_maker_mod_id, created_at, modified_at, edited) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(file_maker_record_id) DO UPDATE SET \
                 enrollment_id = excluded.enrollment_id, \
                 student_id = excluded.student_id, \
                 section_id = excluded.section_id, \
                 status = excluded.status, \
                 enrolled_date = excluded.enrolled_date, \
                 file_maker_mod_id = excluded.file_maker_mod_id, \
                 modified_at = excluded.modified_at, \
                 edited = excluded.edited",
            )
            .bind(&row.id)
            .bind(&row.enrollment_id)
            .bind(&row.student_id)
            .bind(&row.section_id)
            .bind(&row.status)
            .bind(&row.enrolled_date)
            .bind(&row.file_maker_record_id)
            .bind(&row.file_maker_mod_id)
            .bind(row.created_at)
            .bind(row.modified_at)
            .bind(row.edited)
            .execute(&mut *tx)
            .await
            .context("合并 student_enrollment 记录失败")?;
        }
        tx.commit().await.context("提交事务失败")?;
        Ok(())
    }
}
