//! 同步流水线
//!
//! 受理阶段（布局校验、总数探测）同步完成，分页拉取、转换和落库在
//! 后台任务中执行。调用方通过回执中的 run_id 查询或等待后台进度。

use crate::fm::client::FmClient;
use crate::fm::error::FmError;
use crate::fm::query::{format_query_date, FindOptions, QueryClause};
use crate::fm::records::RecordEnvelope;
use crate::fm::sync::status::{RunPhase, SyncRegistry};
use crate::fm::sync::{EntitySync, SyncAccepted, SyncOptions};
use anyhow::{Context, Result};
use sqlx::{Pool, Sqlite};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// 落库批次大小
const LOAD_BATCH_SIZE: usize = 1000;

pub struct SyncEngine {
    client: Arc<FmClient>,
    db: Pool<Sqlite>,
    registry: Arc<SyncRegistry>,
}

impl SyncEngine {
    pub fn new(client: Arc<FmClient>, db: Pool<Sqlite>) -> Self {
        Self {
            client,
            db,
            registry: Arc::new(SyncRegistry::new()),
        }
    }

    pub fn registry(&self) -> Arc<SyncRegistry> {
        self.registry.clone()
    }

    /// 发起一次同步
    ///
    /// 受理检查（单飞、布局、总数）通过后立即返回回执，剩余工作移交
    /// 后台任务。总数为零时直接落终态，不产生后台阶段。
    pub async fn start_sync<E>(&self, entity: E, opts: SyncOptions) -> Result<SyncAccepted>
    where
        E: EntitySync + 'static,
    {
        let name = entity.entity_name();
        let guard = self.registry.try_acquire(name)?;
        let (run_id, cancel) = self.registry.open_run(name);
        info!("[Sync/{}] 🔄 受理同步请求 run_id={} 选项={:?}", name, run_id, opts);

        match self.accept(&entity, &opts, run_id).await {
            Ok(AcceptOutcome::Empty) => {
                self.registry.finish_run(run_id, 0);
                drop(guard);
                info!("[Sync/{}] ✅ 远端无待同步记录", name);
                Ok(SyncAccepted {
                    status: "success",
                    code: 200,
                    total_count: 0,
                    message: format!("Syncing {} in background: 0", name),
                    run_id,
                })
            }
            Ok(AcceptOutcome::Proceed { query, total }) => {
                let client = self.client.clone();
                let db = self.db.clone();
                let registry = self.registry.clone();
                let purge = opts.purge;
                let handle = tokio::spawn(async move {
                    let _guard = guard;
                    let name = entity.entity_name();
                    match run_pipeline(&client, &db, &registry, &entity, query, total, purge, run_id, &cancel).await {
                        Ok(Some(loaded)) => {
                            info!("[Sync/{}] ✅ 同步完成，共落库 {} 条", name, loaded);
                            registry.finish_run(run_id, loaded);
                        }
                        Ok(None) => {
                            info!("[Sync/{}] 同步已取消 run_id={}", name, run_id);
                            registry.mark_cancelled(run_id);
                        }
                        Err(e) => {
                            error!("[Sync/{}] ❌ 同步失败: {:#}", name, e);
                            registry.fail_run(run_id, format!("{:#}", e));
                        }
                    }
                });
                self.registry.attach_handle(run_id, handle);
                Ok(SyncAccepted {
                    status: "success",
                    code: 200,
                    total_count: total,
                    message: format!("Syncing {} in background: {}", name, total),
                    run_id,
                })
            }
            Err(e) => {
                self.registry.fail_run(run_id, format!("{:#}", e));
                Err(e)
            }
        }
    }

    /// 受理检查：布局校验 + 总数探测
    async fn accept<E: EntitySync>(
        &self,
        entity: &E,
        opts: &SyncOptions,
        run_id: Uuid,
    ) -> Result<AcceptOutcome> {
        let name = entity.entity_name();

        self.registry.set_phase(run_id, RunPhase::VerifyingLayout);
        let layouts = self
            .client
            .layouts()
            .await
            .context("获取布局列表失败")?;
        if !layouts.iter().any(|l| l == entity.layout()) {
            return Err(FmError::LayoutNotFound {
                layout: entity.layout().to_string(),
                available: layouts,
            }
            .into());
        }

        let query = build_query(entity, self.client.service_account(), opts)?;

        // 探测查询只取一条，foundCount 即待同步总数
        self.registry.set_phase(run_id, RunPhase::CountingRecords);
        let probe = self
            .client
            .find(entity.layout(), &query, &FindOptions::new().limit(1).offset(1))
            .await
            .context("探测记录总数失败")?;
        let total = probe.data_info.found_count;
        info!("[Sync/{}] 远端待同步记录数: {}", name, total);

        if total == 0 {
            Ok(AcceptOutcome::Empty)
        } else {
            Ok(AcceptOutcome::Proceed { query, total })
        }
    }
}

enum AcceptOutcome {
    Empty,
    Proceed { query: Vec<QueryClause>, total: u64 },
}

/// 构造同步查询
///
/// 基础子句按修改日期过滤（无日期时用 `*` 匹配全部，Data API 不接受
/// 只有 omit 子句的查询）；排除子句剔除最后编辑者为服务账号自身的
/// 记录，避免上一轮回写的数据再次进入同步。
fn build_query<E: EntitySync>(
    entity: &E,
    service_account: &str,
    opts: &SyncOptions,
) -> Result<Vec<QueryClause>, FmError> {
    let base = match &opts.date {
        Some(date) => QueryClause::new().field(
            entity.mod_date_field(),
            format!(">={}", format_query_date(date)?),
        ),
        None => QueryClause::new().field(entity.mod_date_field(), "*"),
    };
    let anti_feedback = QueryClause::new()
        .field(entity.last_editor_field(), format!("={}", service_account))
        .omit();
    Ok(vec![base, anti_feedback])
}

/// 后台流水线：分页拉取 -> 转换 -> 落库
///
/// 返回 Ok(None) 表示在页边界检测到取消请求后退出，本地数据未改动。
#[allow(clippy::too_many_arguments)]
async fn run_pipeline<E: EntitySync>(
    client: &FmClient,
    db: &Pool<Sqlite>,
    registry: &SyncRegistry,
    entity: &E,
    query: Vec<QueryClause>,
    total: u64,
    purge: bool,
    run_id: Uuid,
    cancel: &AtomicBool,
) -> Result<Option<u64>> {
    let name = entity.entity_name();
    let chunk = entity.chunk_size();
    let pages = total.div_ceil(chunk as u64);

    let mut envelopes: Vec<RecordEnvelope> = Vec::with_capacity(total as usize);
    for page in 1..=pages {
        if cancel.load(Ordering::SeqCst) {
            return Ok(None);
        }
        registry.set_phase(run_id, RunPhase::Paginating { page, pages });
        // Data API 偏移从 1 开始
        let offset = (page - 1) as u32 * chunk + 1;
        let result = client
            .find(
                entity.layout(),
                &query,
                &FindOptions::new().limit(chunk).offset(offset),
            )
            .await
            .with_context(|| format!("拉取第 {} 页失败", page))?;
        info!(
            "[Sync/{}] 📡 第 {}/{} 页，本页 {} 条",
            name,
            page,
            pages,
            result.data.len()
        );
        envelopes.extend(result.data);
    }
    if envelopes.len() as u64 != total {
        warn!(
            "[Sync/{}] 拉取总数与探测值不一致: 探测 {} 实际 {}",
            name,
            total,
            envelopes.len()
        );
    }

    registry.set_phase(run_id, RunPhase::Transforming);
    let now = crate::fm::transform::now_ms();
    let mut rows: Vec<E::Local> = Vec::with_capacity(envelopes.len());
    for env in &envelopes {
        let row = entity
            .transform(env, now)
            .with_context(|| format!("转换记录 recordId={} 失败", env.record_id))?;
        rows.push(row);
    }

    registry.set_phase(run_id, RunPhase::Loading);
    entity.init_schema(db).await.context("初始化本地表失败")?;
    if purge {
        let purged = entity.purge_all(db).await.context("清空本地表失败")?;
        info!("[Sync/{}] 清空本地表，删除 {} 条", name, purged);
        for batch in rows.chunks(LOAD_BATCH_SIZE) {
            entity.insert_batch(db, batch).await.context("批量插入失败")?;
        }
    } else {
        for batch in rows.chunks(LOAD_BATCH_SIZE) {
            entity.upsert_batch(db, batch).await.context("批量合并失败")?;
        }
    }
    Ok(Some(rows.len() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fm::config::FmConfig;
    use crate::fm::entities::hub::{HubLocal, HubSync};
    use crate::fm::sync::status::RunState;
    use crate::fm::transport::{FmRequest, FmResponse, FmTransport};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;

    /// 内存版 Data API：支持 sessions、layouts 和 Hubs 布局上的 _find
    struct FakeServer {
        layouts: Vec<&'static str>,
        records: StdMutex<Vec<(String, Value)>>,
        find_calls: AtomicU32,
        last_query: StdMutex<Option<Value>>,
    }

    impl FakeServer {
        fn with_hubs(n: usize) -> Arc<Self> {
            let records = (1..=n)
                .map(|i| {
                    (
                        format!("{}", 100 + i),
                        json!({
                            "hubId": format!("H{:04}", i),
                            "hubName": format!("Hub {}", i),
                            "city": "Chicago",
                            "state": "IL",
                        }),
                    )
                })
                .collect();
            Arc::new(Self {
                layouts: vec!["Hubs", "Sections"],
                records: StdMutex::new(records),
                find_calls: AtomicU32::new(0),
                last_query: StdMutex::new(None),
            })
        }

        fn without_hub_layout() -> Arc<Self> {
            Arc::new(Self {
                layouts: vec!["Sections"],
                records: StdMutex::new(Vec::new()),
                find_calls: AtomicU32::new(0),
                last_query: StdMutex::new(None),
            })
        }

        fn set_field(&self, record_id: &str, field: &str, value: &str) {
            let mut records = self.records.lock().unwrap();
            for (id, fields) in records.iter_mut() {
                if id == record_id {
                    fields[field] = Value::String(value.to_string());
                }
            }
        }
    }

    fn ok_body(response: Value) -> Value {
        json!({
            "response": response,
            "messages": [{ "code": "0", "message": "OK" }],
        })
    }

    #[async_trait]
    impl FmTransport for FakeServer {
        async fn send(&self, req: FmRequest) -> Result<FmResponse, FmError> {
            if req.path == "sessions" {
                return Ok(FmResponse {
                    status: 200,
                    body: ok_body(json!({ "token": "fake-token" })),
                });
            }
            if req.path == "layouts" {
                let layouts: Vec<Value> =
                    self.layouts.iter().map(|l| json!({ "name": l })).collect();
                return Ok(FmResponse {
                    status: 200,
                    body: ok_body(json!({ "layouts": layouts })),
                });
            }
            if req.path == "layouts/Hubs/_find" {
                self.find_calls.fetch_add(1, Ordering::SeqCst);
                let body = req.body.clone().unwrap_or(Value::Null);
                *self.last_query.lock().unwrap() = Some(body["query"].clone());

                let limit: usize = body["limit"].as_str().unwrap_or("100").parse().unwrap();
                let offset: usize = body["offset"].as_str().unwrap_or("1").parse().unwrap();
                let records = self.records.lock().unwrap();
                let total = records.len();
                let page: Vec<Value> = records
                    .iter()
                    .skip(offset.saturating_sub(1))
                    .take(limit)
                    .map(|(id, fields)| {
                        json!({ "fieldData": fields, "recordId": id, "modId": "1" })
                    })
                    .collect();
                if page.is_empty() {
                    return Ok(FmResponse {
                        status: 500,
                        body: json!({
                            "messages": [{ "code": "401", "message": "No records match the request" }],
                            "response": {},
                        }),
                    });
                }
                let returned = page.len();
                return Ok(FmResponse {
                    status: 200,
                    body: ok_body(json!({
                        "data": page,
                        "dataInfo": {
                            "foundCount": total,
                            "returnedCount": returned,
                            "totalRecordCount": total,
                        },
                    })),
                });
            }
            panic!("未预期的请求路径: {}", req.path);
        }
    }

    /// 分页大小为 3 的 hub 同步，用于覆盖多页场景
    struct SmallChunkHub;

    #[async_trait]
    impl EntitySync for SmallChunkHub {
        type Local = HubLocal;

        fn entity_name(&self) -> &'static str {
            HubSync.entity_name()
        }
        fn layout(&self) -> &'static str {
            HubSync.layout()
        }
        fn mod_date_field(&self) -> &'static str {
            HubSync.mod_date_field()
        }
        fn last_editor_field(&self) -> &'static str {
            HubSync.last_editor_field()
        }
        fn chunk_size(&self) -> u32 {
            3
        }
        fn transform(&self, env: &RecordEnvelope, now_ms: i64) -> Result<HubLocal> {
            HubSync.transform(env, now_ms)
        }
        async fn init_schema(&self, db: &Pool<Sqlite>) -> Result<()> {
            HubSync.init_schema(db).await
        }
        async fn purge_all(&self, db: &Pool<Sqlite>) -> Result<u64> {
            HubSync.purge_all(db).await
        }
        async fn insert_batch(&self, db: &Pool<Sqlite>, rows: &[HubLocal]) -> Result<()> {
            HubSync.insert_batch(db, rows).await
        }
        async fn upsert_batch(&self, db: &Pool<Sqlite>, rows: &[HubLocal]) -> Result<()> {
            HubSync.upsert_batch(db, rows).await
        }
    }

    fn test_engine(server: Arc<FakeServer>, db: Pool<Sqlite>) -> SyncEngine {
        let mut config = FmConfig::new("https://fm.test", "school", "apiuser", "secret");
        config.service_account = "sync_service".to_string();
        let client = Arc::new(FmClient::with_transport(Arc::new(config), server));
        SyncEngine::new(client, db)
    }

    async fn test_db() -> (tempfile::TempDir, Pool<Sqlite>) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/test.db?mode=rwc", dir.path().display());
        let pool = crate::fm::db::create_sqlite_pool(&url).await.unwrap();
        (dir, pool)
    }

    async fn local_record_ids(db: &Pool<Sqlite>) -> Vec<String> {
        sqlx::query_scalar("SELECT file_maker_record_id FROM hubs ORDER BY file_maker_record_id")
            .fetch_all(db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_pagination_covers_all_records() {
        // 页大小 3：总数 1/3/4/5 分别覆盖单页、整除、余数、多页余数
        for n in [1usize, 3, 4, 5] {
            let server = FakeServer::with_hubs(n);
            let (_dir, db) = test_db().await;
            let engine = test_engine(server.clone(), db.clone());

            let accepted = engine
                .start_sync(SmallChunkHub, SyncOptions::default())
                .await
                .unwrap();
            assert_eq!(accepted.total_count, n as u64);
            let status = engine.registry().wait(accepted.run_id).await.unwrap();
            assert_eq!(status.state, RunState::Done { loaded: n as u64 });

            // 探测 1 次 + 每页 1 次
            let expected_finds = 1 + n.div_ceil(3) as u32;
            assert_eq!(server.find_calls.load(Ordering::SeqCst), expected_finds);
            assert_eq!(local_record_ids(&db).await.len(), n);
        }
    }

    #[tokio::test]
    async fn test_zero_count_short_circuits() {
        let server = FakeServer::with_hubs(0);
        let (_dir, db) = test_db().await;
        let engine = test_engine(server.clone(), db.clone());

        let accepted = engine
            .start_sync(HubSync, SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(accepted.total_count, 0);
        let status = engine.registry().status(accepted.run_id).unwrap();
        assert_eq!(status.state, RunState::Done { loaded: 0 });

        // 只有探测一次查询，本地表根本没有创建
        assert_eq!(server.find_calls.load(Ordering::SeqCst), 1);
        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' AND name='hubs'")
                .fetch_all(&db)
                .await
                .unwrap();
        assert!(tables.is_empty());
    }

    #[tokio::test]
    async fn test_purge_replaces_local_set() {
        let server = FakeServer::with_hubs(2);
        let (_dir, db) = test_db().await;
        let engine = test_engine(server, db.clone());

        // 预置一条远端已不存在的旧记录
        HubSync.init_schema(&db).await.unwrap();
        sqlx::query(
            "INSERT INTO hubs (id, hub_id, hub_name, city, state, file_maker_record_id, file_maker_mod_id, created_at, modified_at, edited) \
             VALUES ('stale', 'H9999', 'Stale Hub', '', '', '999', '1', 0, 0, 0)",
        )
        .execute(&db)
        .await
        .unwrap();

        let accepted = engine
            .start_sync(
                HubSync,
                SyncOptions {
                    date: None,
                    purge: true,
                },
            )
            .await
            .unwrap();
        engine.registry().wait(accepted.run_id).await.unwrap();

        let ids = local_record_ids(&db).await;
        assert_eq!(ids, vec!["101", "102"]);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_and_applies_edits() {
        let server = FakeServer::with_hubs(2);
        let (_dir, db) = test_db().await;
        let engine = test_engine(server.clone(), db.clone());

        let first = engine
            .start_sync(HubSync, SyncOptions::default())
            .await
            .unwrap();
        engine.registry().wait(first.run_id).await.unwrap();
        assert_eq!(local_record_ids(&db).await.len(), 2);

        // 远端改名后再次同步：不产生新行，名称被覆盖
        server.set_field("102", "hubName", "Renamed Hub");
        let second = engine
            .start_sync(HubSync, SyncOptions::default())
            .await
            .unwrap();
        engine.registry().wait(second.run_id).await.unwrap();

        assert_eq!(local_record_ids(&db).await.len(), 2);
        let name: String =
            sqlx::query_scalar("SELECT hub_name FROM hubs WHERE file_maker_record_id = '102'")
                .fetch_one(&db)
                .await
                .unwrap();
        assert_eq!(name, "Renamed Hub");
    }

    #[tokio::test]
    async fn test_query_always_excludes_service_account_edits() {
        let server = FakeServer::with_hubs(1);
        let (_dir, db) = test_db().await;
        let engine = test_engine(server.clone(), db.clone());

        // 无日期：基础子句匹配全部
        let accepted = engine
            .start_sync(HubSync, SyncOptions::default())
            .await
            .unwrap();
        engine.registry().wait(accepted.run_id).await.unwrap();
        let query = server.last_query.lock().unwrap().clone().unwrap();
        assert_eq!(query[0]["modifiedDate"], "*");
        assert_eq!(query[1]["modifiedBy"], "=sync_service");
        assert_eq!(query[1]["omit"], "true");

        // 带日期：基础子句为 >= 过滤，排除子句仍在
        let accepted = engine
            .start_sync(
                HubSync,
                SyncOptions {
                    date: Some("06152026".to_string()),
                    purge: false,
                },
            )
            .await
            .unwrap();
        engine.registry().wait(accepted.run_id).await.unwrap();
        let query = server.last_query.lock().unwrap().clone().unwrap();
        assert_eq!(query[0]["modifiedDate"], ">=06/15/2026");
        assert_eq!(query[1]["omit"], "true");
    }

    #[tokio::test]
    async fn test_missing_layout_fails_before_any_find() {
        let server = FakeServer::without_hub_layout();
        let (_dir, db) = test_db().await;
        let engine = test_engine(server.clone(), db);

        let err = engine
            .start_sync(HubSync, SyncOptions::default())
            .await
            .unwrap_err();
        let fm_err = err.downcast_ref::<FmError>().unwrap();
        assert!(matches!(fm_err, FmError::LayoutNotFound { layout, .. } if layout == "Hubs"));
        assert_eq!(server.find_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_sync_of_same_entity_is_rejected() {
        let server = FakeServer::with_hubs(1);
        let (_dir, db) = test_db().await;
        let engine = test_engine(server, db);

        let _held = engine.registry().try_acquire("hub").unwrap();
        let err = engine
            .start_sync(HubSync, SyncOptions::default())
            .await
            .unwrap_err();
        let fm_err = err.downcast_ref::<FmError>().unwrap();
        assert!(matches!(fm_err, FmError::SyncInProgress(e) if e == "hub"));
    }

    #[tokio::test]
    async fn test_invalid_date_rejected_at_accept() {
        let server = FakeServer::with_hubs(1);
        let (_dir, db) = test_db().await;
        let engine = test_engine(server.clone(), db);

        let err = engine
            .start_sync(
                HubSync,
                SyncOptions {
                    date: Some("2026-06-15".to_string()),
                    purge: false,
                },
            )
            .await
            .unwrap_err();
        let fm_err = err.downcast_ref::<FmError>().unwrap();
        assert!(matches!(fm_err, FmError::InvalidDate(_)));
        assert_eq!(server.find_calls.load(Ordering::SeqCst), 0);
    }
}
