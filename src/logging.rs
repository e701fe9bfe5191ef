//! 日志模块 - 控制台日志，以及可选的带大小限制的文件日志

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// 日志文件名
pub const LOG_FILE_NAME: &str = "bucketsync.log";

/// 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    pub level: String,
    /// 文件日志目录，None 表示只输出到控制台
    pub log_dir: Option<PathBuf>,
    /// 最大日志文件大小（MB）
    pub max_size_mb: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            max_size_mb: 5,
        }
    }
}

impl LogConfig {
    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 带大小限制的日志写入器，超过上限时把当前文件改名为 .old
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    file: File,
    written: u64,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        Self::with_max_bytes(log_dir, (max_size_mb as u64) * 1024 * 1024)
    }

    fn with_max_bytes(log_dir: &Path, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let file_path = log_dir.join(LOG_FILE_NAME);

        // 检查现有文件大小，如果超过限制则先轮转
        let existing = fs::metadata(&file_path).map(|m| m.len()).unwrap_or(0);
        if max_size > 0 && existing > max_size {
            Self::backup(&file_path)?;
        }

        let file = Self::open(&file_path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            file_path,
            max_size,
            file,
            written,
        })
    }

    fn open(file_path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(file_path)
    }

    fn backup_path(file_path: &Path) -> PathBuf {
        file_path.with_extension("log.old")
    }

    fn backup(file_path: &Path) -> io::Result<()> {
        let backup_path = Self::backup_path(file_path);
        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }
        fs::rename(file_path, &backup_path)
    }

    /// 轮转日志文件
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        Self::backup(&self.file_path)?;
        self.file = Self::open(&self.file_path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.max_size > 0 && self.written >= self.max_size {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// 初始化日志系统
///
/// 返回的 guard 必须在进程退出前一直持有，否则文件日志可能丢失。
pub fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    // 创建日志级别过滤器，RUST_LOG 优先
    let mut env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.tracing_level()).into())
        .from_env_lossy();
    for directive in ["hyper=warn", "reqwest=warn", "opendal=warn"] {
        if let Ok(d) = directive.parse::<Directive>() {
            env_filter = env_filter.add_directive(d);
        }
    }

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);

    let mut guard = None;
    let file_layer = match &config.log_dir {
        Some(dir) => match SizeRotatingWriter::new(dir, config.max_size_mb) {
            Ok(writer) => {
                let (non_blocking, worker_guard) = tracing_appender::non_blocking(writer);
                guard = Some(worker_guard);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(false),
                )
            }
            Err(e) => {
                // 文件日志创建失败，只输出到控制台
                eprintln!("无法创建日志文件 {:?}: {}", dir, e);
                None
            }
        },
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_level() {
        let mut config = LogConfig::default();
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
        config.level = "DEBUG".into();
        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);
        config.level = "bogus".into();
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_rotates_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SizeRotatingWriter::with_max_bytes(dir.path(), 16).unwrap();

        writer.write_all(b"0123456789abcdef").unwrap();
        writer.write_all(b"next").unwrap();
        writer.flush().unwrap();

        let current = fs::read(dir.path().join(LOG_FILE_NAME)).unwrap();
        let backup = fs::read(dir.path().join("bucketsync.log.old")).unwrap();
        assert_eq!(current, b"next");
        assert_eq!(backup, b"0123456789abcdef");
    }

    #[test]
    fn test_oversized_file_rotated_on_open() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LOG_FILE_NAME), vec![b'x'; 64]).unwrap();

        let writer = SizeRotatingWriter::with_max_bytes(dir.path(), 32).unwrap();
        assert_eq!(writer.written, 0);
        assert!(dir.path().join("bucketsync.log.old").exists());
    }
}
