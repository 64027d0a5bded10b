//! student（学生）同步
//!
//! 学生布局字段较多，远端响应体积大，分页大小降为 1000。

use crate::fm::records::RecordEnvelope;
use crate::fm::sync::EntitySync;
use crate::fm::transform::{str_field, sync_stamp};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentLocal {
    pub id: String,
    #[serde(rename = "studentId")]
    pub student_id: String,
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
    pub email: String,
    #[serde(rename = "gradeLevel")]
    pub grade_level: String,
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

pub struct StudentSync;

#[async_trait]
impl EntitySync for StudentSync {
    type Local = StudentLocal;

    fn entity_name(&self) -> &'static str {
        "student"
    }

    fn layout(&self) -> &'static str {
        "Students"
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

    fn transform(&self, env: &RecordEnvelope, now_ms: i64) -> Result<StudentLocal> {
        let stamp = sync_stamp(env, now_ms);
        Ok(StudentLocal {
            id: Uuid::new_v4().to_string(),
            student_id: str_field(&env.field_data, "studentId"),
            first_name: str_field(&env.field_data, "firstName"),
            last_name: str_field(&env.field_data, "lastName"),
            email: str_field(&env.field_data, "email"),
            grade_level: str_field(&env.field_data, "gradeLevel"),
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
            "CREATE TABLE IF NOT EXISTS students (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL DEFAULT '',
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                email TEXT NOT NULL DEFAULT '',
                grade_level TEXT NOT NULL DEFAULT '',
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
        .context("创建 students 表失败")?;
        Ok(())
    }

    async fn purge_all(&self, db: &Pool<Sqlite>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM students")
            .execute(db)
            .await
            .context("清空 students 表失败")?;
        Ok(result.rows_affected())
    }

    async fn insert_batch(&self, db: &Pool<Sqlite>, rows: &[StudentLocal]) -> Result<()> {
        let mut tx = db.begin().await.context("开启事务失败")?;
        for row in rows {
            sqlx::query(
                "INSERT INTO students (id, student_id, first_name, last_name, email, \
                 grade_level, school_id, \
                 file_maker_record_id, file_maker_mod_id, created_at, modified_at, edited) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&row.id)
            .bind(&row.student_id)
            .bind(&row.first_name)
            .bind(&row.last_name)
            .bind(&row.email)
            .bind(&row.grade_level)
            .bind(&row.school_id)
            .bind(&row.file_maker_record_id)
            .bind(&row.file_maker_mod_id)
            .bind(row.created_at)
            .bind(row.modified_at)
            .bind(row.edited)
            .execute(&mut *tx)
            .await
            .context("插入 student 记录失败")?;
        }
        tx.commit().await.context("提交事务失败")?;
        Ok(())
    }

    async fn upsert_batch(&self, db: &Pool<Sqlite>, rows: &[StudentLocal]) -> Result<()> {
        let mut tx = db.begin().await.context("开启事务失败")?;
        for row in rows {
            sqlx::query(
                "INSERT INTO students (id, student_id, first_name, last_name, email, \
                 grade_level, school_id, \
                 file_maker_record_id, file_maker_mod_id, created_at, modified_at, edited) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(file_maker_record_id) DO UPDATE SET \
                 student_id = excluded.student_id, \
                 first_name = excluded.first_name, \
                 last_name = excluded.last_name, \
                 email = excluded.email, \
                 grade_level = excluded.grade_level, \
                 school_id = excluded.school_id, \
                 file_maker_mod_id = excluded.file_maker_mod_id, \
                 modified_at = excluded.modified_at, \
                 edited = excluded.edited",
            )
            .bind(&row.id)
            .bind(&row.student_id)
            .bind(&row.first_name)
            .bind(&row.last_name)
            .bind(&row.email)
            .bind(&row.grade_level)
            .bind(&row.school_id)
            .bind(&row.file_maker_record_id)
            .bind(&row.file_maker_mod_id)
            .bind(row.created_at)
            .bind(row.modified_at)
            .bind(row.edited)
            .execute(&mut *tx)
            .await
            .context("合并 student 记录失败")?;
        }
        tx.commit().await.context("提交事务失败")?;
        Ok(())
    }
}
