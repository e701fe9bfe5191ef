//! 错误类型
//!
//! 组件内部错误只记录日志，只有配置错误和初始化错误会映射为独立的退出码。

use std::path::PathBuf;
use thiserror::Error;

/// 进程退出码
pub mod exit_code {
    pub const SUCCESS: u8 = 0;
    /// 参数缺失或非法
    pub const CONFIG: u8 = 1;
    /// 快照加载或存储客户端初始化失败
    pub const SETUP: u8 = 2;
    /// 目录枚举失败，或所有上传任务都失败
    pub const RUN: u8 = 3;
    /// 被操作员中断（SIGINT 约定值）
    pub const CANCELLED: u8 = 130;
}

/// 快照文件读写错误
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("unable to read snapshot {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse snapshot {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot {path:?} has an invalid record for '{key}': finishedAt precedes startedAt")]
    InvalidRecord { path: PathBuf, key: String },

    #[error("unable to write snapshot {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to serialize snapshot {path:?}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 同步过程中的错误
#[derive(Error, Debug)]
pub enum SyncError {
    /// 参数错误，没有任何副作用
    #[error("invalid configuration: {0}")]
    Config(String),

    /// 存储客户端初始化失败
    #[error("setup failed: {0:#}")]
    Setup(#[source] anyhow::Error),

    /// 快照加载失败（发生在任何上传之前）
    #[error("setup failed: {0}")]
    Snapshot(#[from] SnapshotError),

    /// 目录不可读，只中止扫描器
    #[error("failed to read {path:?}: {source}")]
    Enumeration {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 打开待上传文件失败，只中止当前上传任务
    #[error("failed to open file {path:?}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 上传失败，只中止当前上传任务，文件不会被记录
    #[error("failed to upload file {path:?} to '{key}': {source:#}")]
    Transfer {
        path: PathBuf,
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// 协作式取消，不属于故障
    #[error("sync aborted: cancelled")]
    Cancelled,

    /// 快照保存失败，不改变本次运行结果
    #[error("could not save upload records: {0}")]
    Persistence(#[source] SnapshotError),
}

impl SyncError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }

    /// 该错误对应的进程退出码
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Config(_) => exit_code::CONFIG,
            SyncError::Setup(_) | SyncError::Snapshot(_) => exit_code::SETUP,
            SyncError::Cancelled => exit_code::CANCELLED,
            SyncError::Enumeration { .. }
            | SyncError::OpenFile { .. }
            | SyncError::Transfer { .. } => exit_code::RUN,
            // 持久化失败只记录日志
            SyncError::Persistence(_) => exit_code::SUCCESS,
        }
    }
}
