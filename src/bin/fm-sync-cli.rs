//! FileMaker 同步 CLI
//!
//! 非交互式 CLI，用于触发各实体的同步并等待后台阶段完成。
//! 连接配置从环境变量读取（FM_SERVER、FM_DATABASE、FM_USERNAME、
//! FM_PASSWORD，可选 FM_SERVICE_ACCOUNT、FM_DB_PATH）。

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use fm_sync_core::fm::db::{create_sqlite_pool, db_url_from_env};
use fm_sync_core::fm::entities::hub::HubSync;
use fm_sync_core::fm::entities::partner_school::PartnerSchoolSync;
use fm_sync_core::fm::entities::section::SectionSync;
use fm_sync_core::fm::entities::section_partner_school::SectionPartnerSchoolSync;
use fm_sync_core::fm::entities::student::StudentSync;
use fm_sync_core::fm::entities::student_enrollment::StudentEnrollmentSync;
use fm_sync_core::fm::sync::{RunState, SyncAccepted, SyncOptions};
use fm_sync_core::{FmClient, FmConfig, SyncEngine};
use std::sync::Arc;
use tracing::{error, info};

/// FileMaker 同步 CLI
#[derive(Parser, Debug)]
#[command(name = "fm-sync-cli")]
#[command(about = "FileMaker Data API 同步工具", long_about = None)]
struct Args {
    /// 日志级别（默认: info,fm_sync_core=debug）
    #[arg(long, default_value = "info,fm_sync_core=debug")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 列出数据库可用布局
    Layouts,
    /// 列出数据库可用脚本
    Scripts,
    /// 同步指定实体到本地数据库
    Sync {
        /// 要同步的实体
        #[arg(value_enum)]
        entity: Entity,

        /// 增量起始日期（MMDDYYYY），不指定则全量
        #[arg(short, long)]
        date: Option<String>,

        /// 清空本地表后重建
        #[arg(short, long)]
        purge: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Entity {
    Hubs,
    Sections,
    PartnerSchools,
    SectionPartnerSchools,
    Students,
    StudentEnrollments,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("无法创建日志文件 debug.log");

    // 控制台保留 ANSI 颜色，文件禁用
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level);

    let config = Arc::new(FmConfig::from_env()?);
    let client = Arc::new(FmClient::new(config));

    match args.command {
        Command::Layouts => {
            let layouts = client.layouts().await?;
            for layout in layouts {
                println!("{}", layout);
            }
        }
        Command::Scripts => {
            let scripts = client.scripts().await?;
            for script in scripts {
                println!("{}", script);
            }
        }
        Command::Sync {
            entity,
            date,
            purge,
        } => {
            let db = create_sqlite_pool(&db_url_from_env()).await?;
            let engine = SyncEngine::new(client, db);
            let opts = SyncOptions { date, purge };

            let accepted: SyncAccepted = match entity {
                Entity::Hubs => engine.start_sync(HubSync, opts).await?,
                Entity::Sections => engine.start_sync(SectionSync, opts).await?,
                Entity::PartnerSchools => engine.start_sync(PartnerSchoolSync, opts).await?,
                Entity::SectionPartnerSchools => {
                    engine.start_sync(SectionPartnerSchoolSync, opts).await?
                }
                Entity::Students => engine.start_sync(StudentSync, opts).await?,
                Entity::StudentEnrollments => {
                    engine.start_sync(StudentEnrollmentSync, opts).await?
                }
            };
            info!("[CLI] {}", accepted.message);

            // CLI 场景下等待后台阶段结束再退出
            let registry = engine.registry();
            match registry.wait(accepted.run_id).await.map(|s| s.state) {
                Some(RunState::Done { loaded }) => {
                    info!("[CLI] ✅ 同步完成，共落库 {} 条", loaded);
                }
                Some(RunState::Failed { error: message }) => {
                    error!("[CLI] ❌ 同步失败: {}", message);
                    anyhow::bail!("同步失败: {}", message);
                }
                Some(RunState::Cancelled) => {
                    info!("[CLI] 同步已取消");
                }
                other => {
                    error!("[CLI] 运行状态异常: {:?}", other);
                }
            }
        }
    }
    Ok(())
}
