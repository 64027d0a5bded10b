pub mod fm;

// 重新导出常用类型，方便外部使用
pub use fm::{
    client::FmClient,
    config::FmConfig,
    error::FmError,
    sync::{EntitySync, SyncAccepted, SyncEngine, SyncOptions, SyncRegistry},
};
