//! 应用配置模块
//!
//! 命令行参数解析（clap）以及校验后的运行配置。

use crate::core::ScanConfig;
use crate::error::{exit_code, SyncError};
use crate::logging::LogConfig;
use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// 默认并发上传数
pub const DEFAULT_CONCURRENCY: usize = 3;
/// 默认快照文件路径
pub const DEFAULT_RECORD_PATH: &str = "./uploadRecord.json";
/// 默认工作队列容量
pub const DEFAULT_QUEUE_SIZE: usize = 64;

/// 参数解析失败时的退出码，显示帮助或版本信息不算错误
pub fn parse_error_exit_code(err: &clap::Error) -> u8 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => exit_code::SUCCESS,
        _ => exit_code::CONFIG,
    }
}

/// 把本地目录中的文件上传到对象存储，已上传的文件会被跳过
#[derive(Parser, Debug, Clone)]
#[command(
    name = "bucketsync",
    version,
    about = "Upload the files of a directory to a bucket, skipping files already uploaded",
    after_help = "EXAMPLES:\n    \
        bucketsync ./photos my-bucket\n    \
        bucketsync ./photos my-bucket 2024/trip -c 8\n    \
        bucketsync ./logs archive --backend local --local-root /mnt/backup"
)]
pub struct CliArgs {
    /// Directory to upload (not recursive)
    #[arg(value_name = "DIRECTORY")]
    pub directory: PathBuf,

    /// Bucket to upload into
    #[arg(value_name = "BUCKET")]
    pub bucket: String,

    /// Key prefix inside the bucket
    #[arg(value_name = "PREFIX")]
    pub prefix: Option<String>,

    /// Number of concurrent uploaders
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY, value_name = "NUM")]
    pub concurrency: usize,

    /// File recording completed uploads
    #[arg(
        long,
        visible_alias = "snapshot-path",
        default_value = DEFAULT_RECORD_PATH,
        value_name = "FILE"
    )]
    pub record_path: PathBuf,

    /// Capacity of the queue between the scanner and the uploaders
    #[arg(long, default_value_t = DEFAULT_QUEUE_SIZE, value_name = "NUM")]
    pub queue_size: usize,

    /// Skip files whose name matches pattern (can be repeated, supports * and ?)
    #[arg(long = "exclude", value_name = "PATTERN", action = clap::ArgAction::Append)]
    pub exclude: Vec<String>,

    /// Storage backend
    #[arg(long, value_enum, default_value_t = BackendKind::S3)]
    pub backend: BackendKind,

    /// S3 region (falls back to AWS_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// S3 endpoint for S3-compatible stores
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Root directory for the local backend
    #[arg(long, value_name = "DIR")]
    pub local_root: Option<PathBuf>,

    /// Verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Also write logs to this directory
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Maximum log file size before rotation
    #[arg(long, default_value_t = 5, value_name = "MB")]
    pub log_max_size_mb: u32,
}

impl CliArgs {
    /// 日志配置（在校验其余参数之前就需要）
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: if self.verbose { "debug" } else { "info" }.to_string(),
            log_dir: self.log_dir.clone(),
            max_size_mb: self.log_max_size_mb,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    S3,
    Local,
}

/// 存储后端配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3 {
        region: Option<String>,
        endpoint: Option<String>,
    },
    Local {
        root: PathBuf,
    },
}

/// 校验后的同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 待同步目录
    pub source_dir: PathBuf,
    /// 目标 bucket
    pub bucket: String,
    /// bucket 内的 key 前缀
    pub key_prefix: String,
    /// 并发上传数（>= 1）
    pub concurrency: usize,
    /// 快照文件路径
    pub snapshot_path: PathBuf,
    /// 工作队列容量（>= 1）
    pub queue_size: usize,
    /// 扫描配置
    pub scan_config: ScanConfig,
    pub backend: BackendConfig,
}

impl SyncConfig {
    pub fn new(source_dir: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            source_dir: source_dir.into(),
            bucket: bucket.into(),
            key_prefix: String::new(),
            concurrency: DEFAULT_CONCURRENCY,
            snapshot_path: PathBuf::from(DEFAULT_RECORD_PATH),
            queue_size: DEFAULT_QUEUE_SIZE,
            scan_config: ScanConfig::default(),
            backend: BackendConfig::S3 {
                region: None,
                endpoint: None,
            },
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = path.into();
        self
    }

    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    pub fn with_scan_config(mut self, scan_config: ScanConfig) -> Self {
        self.scan_config = scan_config;
        self
    }

    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    /// 从命令行参数构建并校验
    pub fn from_args(args: CliArgs) -> Result<Self, SyncError> {
        let backend = match args.backend {
            BackendKind::S3 => BackendConfig::S3 {
                region: args.region,
                endpoint: args.endpoint,
            },
            BackendKind::Local => BackendConfig::Local {
                root: args.local_root.ok_or_else(|| {
                    SyncError::Config("--local-root is required with --backend local".into())
                })?,
            },
        };

        let config = Self::new(args.directory, args.bucket)
            .with_prefix(args.prefix.unwrap_or_default())
            .with_concurrency(args.concurrency)
            .with_snapshot_path(args.record_path)
            .with_queue_size(args.queue_size)
            .with_scan_config(ScanConfig::with_excludes(args.exclude)?)
            .with_backend(backend);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.concurrency == 0 {
            return Err(SyncError::Config("concurrency must be at least 1".into()));
        }
        if self.queue_size == 0 {
            return Err(SyncError::Config("queue size must be at least 1".into()));
        }
        if self.bucket.trim().is_empty() {
            return Err(SyncError::Config("bucket name must not be empty".into()));
        }
        if self.source_dir.as_os_str().is_empty() {
            return Err(SyncError::Config("directory to upload must not be empty".into()));
        }
        if self.snapshot_path.as_os_str().is_empty() {
            return Err(SyncError::Config("record path must not be empty".into()));
        }
        Ok(())
    }
}
