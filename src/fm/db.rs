//! 本地 SQLite 连接池

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use tracing::info;

/// 从环境变量 FM_DB_PATH 读取数据库地址，未设置时使用默认文件
pub fn db_url_from_env() -> String {
    std::env::var("FM_DB_PATH").unwrap_or_else(|_| "sqlite://fm_sync.db?mode=rwc".to_string())
}

/// 创建 SQLite 连接池
pub async fn create_sqlite_pool(db_url: &str) -> Result<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .with_context(|| format!("连接 SQLite 数据库失败: {}", db_url))?;
    info!("[DB] ✅ SQLite 连接池已就绪: {}", db_url);
    Ok(pool)
}
