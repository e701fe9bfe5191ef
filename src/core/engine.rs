use crate::config::SyncConfig;
use crate::core::ledger::Ledger;
use crate::core::scanner::{FileScanner, ScanSummary};
use crate::core::uploader::{TransferStats, Uploader};
use crate::error::{exit_code, SyncError};
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 一次同步运行所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunPhase {
    Loading,
    Running,
    Draining,
    Persisting,
    Done,
    Failed,
}

/// 运行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunOutcome {
    /// 正常完成（可能有个别文件失败，已记录日志）
    Completed,
    /// 被操作员中断
    Cancelled,
    /// 目录枚举失败，或所有上传任务都失败
    Failed,
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub phase: RunPhase,
    pub files_scanned: u64,
    pub files_queued: u64,
    pub files_skipped: u64,
    pub files_attempted: u64,
    pub files_uploaded: u64,
    pub bytes_transferred: u64,
    pub uploader_failures: u32,
    pub errors: Vec<String>,
    /// 快照是否保存成功
    pub persisted: bool,
}

impl SyncReport {
    pub fn exit_code(&self) -> u8 {
        match self.outcome {
            RunOutcome::Completed => exit_code::SUCCESS,
            RunOutcome::Cancelled => exit_code::CANCELLED,
            RunOutcome::Failed => exit_code::RUN,
        }
    }
}

/// 流水线结束后收集到的结果
#[derive(Debug, Default)]
struct PipelineResult {
    scan: ScanSummary,
    enumeration_failed: bool,
    uploaders_failed: u32,
    cancelled: bool,
    errors: Vec<String>,
}

/// 同步引擎：扫描器 -> 队列 -> 上传任务池，结束时保存账本
pub struct SyncEngine {
    config: SyncConfig,
    storage: Arc<dyn Storage>,
    ledger: Arc<Ledger>,
    cancelled: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, storage: Arc<dyn Storage>) -> Self {
        Self {
            config,
            storage,
            ledger: Arc::new(Ledger::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 取消同步
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 共享的取消标志，交给信号处理器
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// 检查是否已取消
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// 运行一次同步
    ///
    /// 只有配置非法或快照加载失败会返回错误，此时还没有开始任何上传。
    /// 其余情况（包括失败和取消）都会先保存账本，再返回报告。
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        self.config.validate()?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();

        info!(
            "开始同步: {:?} -> {} (并发 {}, run {})",
            self.config.source_dir,
            self.storage.name(),
            self.config.concurrency,
            run_id
        );

        debug!("同步阶段: {:?}", RunPhase::Loading);
        let ledger = self.ledger.clone();
        let snapshot_path = self.config.snapshot_path.clone();
        tokio::task::spawn_blocking(move || ledger.load(&snapshot_path))
            .await
            .map_err(|e| SyncError::Setup(e.into()))??;

        debug!("同步阶段: {:?}", RunPhase::Running);
        let stats = Arc::new(TransferStats::default());
        let result = self.run_pipeline(stats.clone()).await;

        debug!("同步阶段: {:?}", RunPhase::Persisting);
        let persisted = self.persist().await;

        let attempted = stats.files_attempted.load(Ordering::Relaxed);
        let uploaded = stats.files_uploaded.load(Ordering::Relaxed);
        // 尝试过的上传全部失败也算运行失败，不论失败的任务数是否达到并发数
        let outcome = if result.enumeration_failed
            || result.uploaders_failed as usize == self.config.concurrency
            || (attempted > 0 && uploaded == 0)
        {
            RunOutcome::Failed
        } else if result.cancelled || self.is_cancelled() {
            RunOutcome::Cancelled
        } else {
            RunOutcome::Completed
        };
        let phase = match outcome {
            RunOutcome::Failed => RunPhase::Failed,
            _ => RunPhase::Done,
        };
        debug!("同步阶段: {:?}", phase);

        let report = SyncReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcome,
            phase,
            files_scanned: result.scan.scanned,
            files_queued: result.scan.queued,
            files_skipped: result.scan.skipped,
            files_attempted: attempted,
            files_uploaded: uploaded,
            bytes_transferred: stats.bytes_transferred.load(Ordering::Relaxed),
            uploader_failures: result.uploaders_failed,
            errors: result.errors,
            persisted,
        };

        info!(
            "同步结束: {:?} - 上传 {}, 跳过 {}, 失败任务 {}, {} 字节",
            report.outcome,
            report.files_uploaded,
            report.files_skipped,
            report.uploader_failures,
            report.bytes_transferred
        );

        Ok(report)
    }

    /// 启动扫描器和上传任务池，等待全部结束
    async fn run_pipeline(&self, stats: Arc<TransferStats>) -> PipelineResult {
        let (tx, rx) = async_channel::bounded(self.config.queue_size);

        // 唯一的生产者，持有唯一的 Sender
        let scanner = FileScanner::new(
            self.config.scan_config.clone(),
            self.ledger.clone(),
            self.cancelled.clone(),
        );
        let source_dir = self.config.source_dir.clone();
        let scan_handle = tokio::spawn(async move { scanner.scan_dir(&source_dir, tx).await });

        let mut handles = Vec::with_capacity(self.config.concurrency);
        for id in 0..self.config.concurrency {
            let uploader = Uploader::new(
                id,
                self.storage.clone(),
                self.ledger.clone(),
                self.config.key_prefix.clone(),
                self.cancelled.clone(),
                stats.clone(),
            );
            let rx = rx.clone();
            handles.push(tokio::spawn(async move { uploader.run(rx).await }));
        }
        // 只有上传任务持有 Receiver，全部退出后扫描器的发送会失败
        drop(rx);

        debug!("同步阶段: {:?}", RunPhase::Draining);
        let mut result = PipelineResult::default();

        match scan_handle.await {
            Ok(Ok(summary)) => {
                result.cancelled |= summary.cancelled;
                result.scan = summary;
            }
            Ok(Err(e)) => {
                error!("无法枚举所有文件: {}", e);
                result.enumeration_failed = true;
                result.errors.push(e.to_string());
            }
            Err(e) => {
                error!("扫描任务失败: {}", e);
                result.enumeration_failed = true;
                result.errors.push(format!("scanner task failed: {}", e));
            }
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) if e.is_cancellation() => result.cancelled = true,
                Ok(Err(e)) => {
                    error!("上传任务失败: {}", e);
                    result.uploaders_failed += 1;
                    result.errors.push(e.to_string());
                }
                Err(e) => {
                    error!("上传任务异常退出: {}", e);
                    result.uploaders_failed += 1;
                    result.errors.push(format!("uploader task failed: {}", e));
                }
            }
        }

        result
    }

    /// 保存账本，失败只记录日志
    async fn persist(&self) -> bool {
        let ledger = self.ledger.clone();
        let path = self.config.snapshot_path.clone();

        match tokio::task::spawn_blocking(move || ledger.save(&path)).await {
            Ok(Ok(count)) => {
                info!("已保存 {} 条上传记录: {:?}", count, self.config.snapshot_path);
                true
            }
            Ok(Err(e)) => {
                warn!("{}", SyncError::Persistence(e));
                false
            }
            Err(e) => {
                warn!("保存上传记录的任务异常退出: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;

    #[tokio::test]
    async fn test_invalid_config_rejected_before_loading() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("bucket")).await.unwrap();
        let config = SyncConfig::new(dir.path(), "bucket")
            .with_concurrency(0)
            .with_snapshot_path(dir.path().join("records.json"));

        let engine = SyncEngine::new(config, Arc::new(storage));
        let err = engine.run().await.unwrap_err();

        assert!(matches!(err, SyncError::Config(_)));
        assert!(!dir.path().join("records.json").exists());
    }

    #[tokio::test]
    async fn test_empty_directory_completes() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("empty");
        std::fs::create_dir(&source).unwrap();
        let storage = LocalStorage::new(dir.path().join("bucket")).await.unwrap();
        let config = SyncConfig::new(&source, "bucket")
            .with_snapshot_path(dir.path().join("records.json"));

        let report = SyncEngine::new(config, Arc::new(storage)).run().await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.exit_code(), exit_code::SUCCESS);
        assert_eq!(report.files_scanned, 0);
        assert!(report.persisted);
    }
}
