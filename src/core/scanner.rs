use crate::core::ledger::{dedup_key, Ledger};
use crate::error::SyncError;
use async_channel::Sender;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 文件扫描器配置
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// 排除规则（按文件名匹配的 glob）
    exclude_patterns: Vec<String>,
    compiled: Vec<Regex>,
}

impl ScanConfig {
    /// 编译排除规则，非法规则视为配置错误
    pub fn with_excludes(patterns: Vec<String>) -> Result<Self, SyncError> {
        let compiled = patterns
            .iter()
            .map(|p| {
                Self::glob_to_regex(p).map_err(|e| {
                    SyncError::Config(format!("invalid exclude pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            exclude_patterns: patterns,
            compiled,
        })
    }

    /// 简单的 glob 转正则：只支持 * 和 ?
    fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
        let mut re = String::with_capacity(pattern.len() + 8);
        re.push('^');
        for c in pattern.chars() {
            match c {
                '*' => re.push_str(".*"),
                '?' => re.push('.'),
                other => re.push_str(&regex::escape(&other.to_string())),
            }
        }
        re.push('$');
        Regex::new(&re)
    }

    pub fn exclude_patterns(&self) -> &[String] {
        &self.exclude_patterns
    }

    /// 检查文件名是否应该被排除
    pub fn is_excluded(&self, file_name: &str) -> bool {
        self.compiled.iter().any(|re| re.is_match(file_name))
    }
}

/// 扫描结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// 枚举到的条目数
    pub scanned: u64,
    /// 放入队列的文件数
    pub queued: u64,
    /// 跳过的条目数（目录、已上传、被排除）
    pub skipped: u64,
    /// 所有上传任务都已退出，提前停止入队
    pub truncated: bool,
    /// 因取消而提前结束，计数只包含取消前处理过的条目
    pub cancelled: bool,
}

/// 单层目录扫描器
///
/// 唯一的生产者：把未上传过的文件路径送入工作队列。
pub struct FileScanner {
    config: ScanConfig,
    ledger: Arc<Ledger>,
    cancel_flag: Arc<AtomicBool>,
}

impl FileScanner {
    pub fn new(config: ScanConfig, ledger: Arc<Ledger>, cancel_flag: Arc<AtomicBool>) -> Self {
        Self {
            config,
            ledger,
            cancel_flag,
        }
    }

    /// 检查是否已取消
    fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }

    /// 扫描目录并把候选文件送入队列
    ///
    /// `out` 在函数返回时被释放，无论成功、失败还是取消，消费者都会看到队列关闭。
    /// 取消不是错误：返回已处理部分的统计，并设置 `cancelled`。
    pub async fn scan_dir(&self, dir: &Path, out: Sender<PathBuf>) -> Result<ScanSummary, SyncError> {
        let enumeration_err = |e: std::io::Error| SyncError::Enumeration {
            path: dir.to_path_buf(),
            source: e,
        };

        let dir = std::path::absolute(dir).map_err(enumeration_err)?;
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(enumeration_err)?;

        info!("开始扫描目录: {:?}", dir);
        let mut summary = ScanSummary::default();

        while let Some(entry) = entries.next_entry().await.map_err(enumeration_err)? {
            if self.is_cancelled() {
                info!("扫描已取消: {:?} (已入队 {} 个)", dir, summary.queued);
                summary.cancelled = true;
                return Ok(summary);
            }

            summary.scanned += 1;
            let path = entry.path();

            if self.is_excluded(&entry, &path).await {
                debug!("跳过: {:?}", path);
                summary.skipped += 1;
                continue;
            }

            if out.send(path.clone()).await.is_err() {
                warn!("所有上传任务都已退出，停止入队: {:?}", dir);
                summary.truncated = true;
                return Ok(summary);
            }
            summary.queued += 1;
        }

        info!(
            "所有文件已加入上传队列: {:?} ({} 个条目, {} 个入队, {} 个跳过)",
            dir, summary.scanned, summary.queued, summary.skipped
        );
        Ok(summary)
    }

    /// 目录、无法识别的文件名、匹配排除规则、已上传的文件都被排除
    async fn is_excluded(&self, entry: &tokio::fs::DirEntry, path: &Path) -> bool {
        let is_dir = match entry.file_type().await {
            // 符号链接按目标类型判断
            Ok(ft) if ft.is_symlink() => tokio::fs::metadata(path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false),
            Ok(ft) => ft.is_dir(),
            Err(e) => {
                warn!("无法读取文件类型，跳过: {:?} - {}", path, e);
                return true;
            }
        };
        if is_dir {
            return true;
        }

        let Some(key) = dedup_key(path) else {
            warn!("文件名不是有效的 UTF-8，跳过: {:?}", path);
            return true;
        };

        if self.config.is_excluded(&key) {
            return true;
        }

        // 是否已经上传过
        self.ledger.contains(&key)
    }
}
