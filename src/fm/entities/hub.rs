//! hub（教学点）同步

use crate::fm::records::RecordEnvelope;
use crate::fm::sync::EntitySync;
use crate::fm::transform::{str_field, sync_stamp};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

/// 本地 hub 行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubLocal {
    pub id: String,
    #[serde(rename = "hubId")]
    pub hub_id: String,
    #[serde(rename = "hubName")]
    pub hub_name: String,
    pub city: String,
    pub state: String,
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

pub struct HubSync;

#[async_trait]
impl EntitySync for HubSync {
    type Local = HubLocal;

    fn entity_name(&self) -> &'static str {
        "hub"
    }

    fn layout(&self) -> &'static str {
        "Hubs"
    }

    fn mod_date_field(&self) -> &'static str {
        "modifiedDate"
    }

    fn last_editor_field(&self) -> &'static str {
        "modifiedBy"
    }

    fn transform(&self, env: &RecordEnvelope, now_ms: i64) -> Result<HubLocal> {
        let stamp = sync_stamp(env, now_ms);
        Ok(HubLocal {
            id: Uuid::new_v4().to_string(),
            hub_id: str_field(&env.field_data, "hubId"),
            hub_name: str_field(&env.field_data, "hubName"),
            city: str_field(&env.field_data, "city"),
            state: str_field(&env.field_data, "state"),
            file_maker_record_id: stamp.file_maker_record_id,
            file_maker_mod_id: stamp.file_maker_mod_id,
            created_at: stamp.created_at,
            modified_at: stamp.modified_at,
            edited: stamp.edited,
        })
    }

    async fn init_schema(&self, db: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS hubs (
                id TEXT PRIMARY KEY,
                hub_id TEXT NOT NULL DEFAULT '',
                hub_name TEXT NOT NULL DEFAULT '',
                city TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL DEFAULT '',
                file_maker_record_id TEXT NOT NULL UNIQUE,
                file_maker_mod_id TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL DEFAULT 0,
                modified_at INTEGER NOT NULL DEFAULT 0,
                edited INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(db)
        .await
        .context("创建 hubs 表失败")?;
        Ok(())
    }

    async fn purge_all(&self, db: &Pool<Sqlite>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM hubs")
            .execute(db)
            .await
            .context("清空 hubs 表失败")?;
        Ok(result.rows_affected())
    }

    async fn insert_batch(&self, db: &Pool<Sqlite>, rows: &[HubLocal]) -> Result<()> {
        let mut tx = db.begin().await.context("开启事务失败")?;
        for row in rows {
            sqlx::query(
                "INSERT INTO hubs (id, hub_id, hub_name, city, state, \
                 file_maker_record_id, file_maker_mod_id, created_at, modified_at, edited) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&row.id)
            .bind(&row.hub_id)
            .bind(&row.hub_name)
            .bind(&row.city)
            .bind(&row.state)
            .bind(&row.file_maker_record_id)
            .bind(&row.file_maker_mod_id)
            .bind(row.created_at)
            .bind(row.modified_at)
            .bind(row.edited)
            .execute(&mut *tx)
            .await
            .context("插入 hub 记录失败")?;
        }
        tx.commit().await.context("提交事务失败")?;
        Ok(())
    }

    async fn upsert_batch(&self, db: &Pool<Sqlite>, rows: &[HubLocal]) -> Result<()> {
        let mut tx = db.begin().await.context("开启事务失败")?;
        for row in rows {
            // 冲突时更新业务字段和修改时间，保留首次同步的 id 和 created_at
            sqlx::query(
                "INSERT INTO hubs (id, hub_id, hub_name, city, state, \
                 file_maker_record_id, file_maker_mod_id, created_at, modified_at, edited) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(file_maker_record_id) DO UPDATE SET \
                 hub_id = excluded.hub_id, \
                 hub_name = excluded.hub_name, \
                 city = excluded.city, \
                 state = excluded.state, \
                 file_maker_mod_id = excluded.file_maker_mod_id, \
                 modified_at = excluded.modified_at, \
                 edited = excluded.edited",
            )
            .bind(&row.id)
            .bind(&row.hub_id)
            .bind(&row.hub_name)
            .bind(&row.city)
            .bind(&row.state)
            .bind(&row.file_maker_record_id)
            .bind(&row.file_maker_mod_id)
            .bind(row.created_at)
            .bind(row.modified_at)
            .bind(row.edited)
            .execute(&mut *tx)
            .await
            .context("合并 hub 记录失败")?;
        }
        tx.commit().await.context("提交事务失败")?;
        Ok(())
    }
}
