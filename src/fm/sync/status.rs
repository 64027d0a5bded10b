//! 运行状态登记与单飞保护
//!
//! 每次同步分配一个 run_id，后台阶段的进度通过 `SyncRegistry` 查询。
//! 终态（Done/Failed/Cancelled）一经写入不再变化。同一实体同一时刻
//! 只允许一个运行中的同步任务。

use crate::fm::error::FmError;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// 登记表保留的终态运行数量上限，超出后按结束时间淘汰最旧的
const MAX_TERMINAL_RUNS: usize = 64;

/// 后台流水线当前阶段
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPhase {
    VerifyingLayout,
    CountingRecords,
    Paginating { page: u64, pages: u64 },
    Transforming,
    Loading,
}

/// 一次运行的状态（Running 之外均为终态）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Running(RunPhase),
    Done { loaded: u64 },
    Failed { error: String },
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Running(_))
    }
}

/// 对外可查询的运行快照
#[derive(Debug, Clone)]
pub struct RunStatus {
    pub run_id: Uuid,
    pub entity: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct RunRecord {
    status: RunStatus,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// 单飞保护凭据：持有期间同一实体不能再次发起同步，drop 时释放
#[derive(Debug)]
pub struct InflightGuard {
    inflight: Arc<Mutex<HashSet<String>>>,
    entity: String,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let mut set = self
            .inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        set.remove(&self.entity);
    }
}

/// 运行状态登记表
pub struct SyncRegistry {
    runs: Mutex<HashMap<Uuid, RunRecord>>,
    inflight: Arc<Mutex<HashSet<String>>>,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            inflight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// 申请实体的单飞凭据，已有任务在执行时返回 SyncInProgress
    pub fn try_acquire(&self, entity: &str) -> Result<InflightGuard, FmError> {
        let mut set = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(entity.to_string()) {
            warn!("[Sync/{}] 已有同步任务在执行，拒绝本次请求", entity);
            return Err(FmError::SyncInProgress(entity.to_string()));
        }
        Ok(InflightGuard {
            inflight: self.inflight.clone(),
            entity: entity.to_string(),
        })
    }

    /// 登记一次新运行，返回 run_id 和协作取消标志
    pub fn open_run(&self, entity: &str) -> (Uuid, Arc<AtomicBool>) {
        let run_id = Uuid::new_v4();
        let cancel = Arc::new(AtomicBool::new(false));
        let record = RunRecord {
            status: RunStatus {
                run_id,
                entity: entity.to_string(),
                state: RunState::Running(RunPhase::VerifyingLayout),
                started_at: Utc::now(),
                finished_at: None,
            },
            cancel: cancel.clone(),
            handle: None,
        };
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.insert(run_id, record);
        prune_terminal(&mut runs);
        (run_id, cancel)
    }

    /// 更新运行阶段（终态后忽略）
    pub fn set_phase(&self, run_id: Uuid, phase: RunPhase) {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = runs.get_mut(&run_id) {
            if !record.status.state.is_terminal() {
                record.status.state = RunState::Running(phase);
            }
        }
    }

    pub fn finish_run(&self, run_id: Uuid, loaded: u64) {
        self.close(run_id, RunState::Done { loaded });
    }

    pub fn fail_run(&self, run_id: Uuid, error: String) {
        self.close(run_id, RunState::Failed { error });
    }

    pub fn mark_cancelled(&self, run_id: Uuid) {
        self.close(run_id, RunState::Cancelled);
    }

    fn close(&self, run_id: Uuid, state: RunState) {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = runs.get_mut(&run_id) {
            if record.status.state.is_terminal() {
                return;
            }
            record.status.state = state;
            record.status.finished_at = Some(Utc::now());
        }
    }

    /// 读取运行的取消标志
    pub fn cancel_flag(&self, run_id: Uuid) -> Option<Arc<AtomicBool>> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.get(&run_id).map(|r| r.cancel.clone())
    }

    /// 请求取消：置位协作取消标志，流水线在下一页边界退出
    pub fn cancel(&self, run_id: Uuid) {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = runs.get(&run_id) {
            info!("[Sync/{}] 收到取消请求 run_id={}", record.status.entity, run_id);
            record.cancel.store(true, Ordering::SeqCst);
        }
    }

    /// 挂接后台任务句柄，供 wait 等待
    pub fn attach_handle(&self, run_id: Uuid, handle: JoinHandle<()>) {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = runs.get_mut(&run_id) {
            record.handle = Some(handle);
        }
    }

    /// 运行状态快照
    pub fn status(&self, run_id: Uuid) -> Option<RunStatus> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.get(&run_id).map(|r| r.status.clone())
    }

    /// 等待后台阶段结束，返回终态快照
    pub async fn wait(&self, run_id: Uuid) -> Option<RunStatus> {
        let handle = {
            let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
            runs.get_mut(&run_id).and_then(|r| r.handle.take())
        };
        if let Some(handle) = handle {
            // 后台任务自行记录失败终态，join 错误无需上抛
            let _ = handle.await;
        }
        self.status(run_id)
    }
}

impl Default for SyncRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 淘汰超出保留上限的终态运行，进行中的运行不受影响
fn prune_terminal(runs: &mut HashMap<Uuid, RunRecord>) {
    let mut terminal: Vec<(Uuid, DateTime<Utc>)> = runs
        .iter()
        .filter(|(_, r)| r.status.state.is_terminal())
        .map(|(id, r)| (*id, r.status.finished_at.unwrap_or(r.status.started_at)))
        .collect();
    if terminal.len() <= MAX_TERMINAL_RUNS {
        return;
    }
    terminal.sort_by_key(|(_, finished)| *finished);
    let excess = terminal.len() - MAX_TERMINAL_RUNS;
    for (run_id, _) in terminal.into_iter().take(excess) {
        runs.remove(&run_id);
    }
}
