use crate::core::ledger::{dedup_key, Ledger, UploadRecord};
use crate::error::SyncError;
use crate::storage::{ByteStream, Storage};
use async_channel::Receiver;
use chrono::Utc;
use futures::TryStreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// 上传统计（所有上传任务共享）
#[derive(Debug, Default)]
pub struct TransferStats {
    /// 已从队列取出并开始处理的文件数
    pub files_attempted: AtomicU64,
    pub files_uploaded: AtomicU64,
    pub bytes_transferred: AtomicU64,
}

/// 由前缀和文件名拼出远端 key
pub fn remote_key(prefix: &str, file_name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{}/{}", prefix, file_name)
    }
}

/// 上传任务：从队列取路径，上传后写入账本
pub struct Uploader {
    id: usize,
    storage: Arc<dyn Storage>,
    ledger: Arc<Ledger>,
    key_prefix: String,
    cancel_flag: Arc<AtomicBool>,
    stats: Arc<TransferStats>,
}

impl Uploader {
    pub fn new(
        id: usize,
        storage: Arc<dyn Storage>,
        ledger: Arc<Ledger>,
        key_prefix: impl Into<String>,
        cancel_flag: Arc<AtomicBool>,
        stats: Arc<TransferStats>,
    ) -> Self {
        Self {
            id,
            storage,
            ledger,
            key_prefix: key_prefix.into(),
            cancel_flag,
            stats,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }

    /// 持续消费队列，直到队列关闭且为空
    ///
    /// 任何打开或上传失败都会结束当前任务，不影响其它任务。返回本任务上传的文件数。
    pub async fn run(&self, files: Receiver<PathBuf>) -> Result<u64, SyncError> {
        let mut uploaded = 0u64;

        loop {
            if self.is_cancelled() {
                debug!("上传任务 #{} 已取消", self.id);
                return Err(SyncError::Cancelled);
            }

            let Ok(path) = files.recv().await else {
                break;
            };

            // 等待期间可能已被取消，此文件留到下次运行
            if self.is_cancelled() {
                debug!("上传任务 #{} 已取消，放弃: {:?}", self.id, path);
                return Err(SyncError::Cancelled);
            }

            self.stats.files_attempted.fetch_add(1, Ordering::Relaxed);
            let (dedup, record) = self.upload_file(&path).await?;
            info!(
                "上传成功: {}/{} ({}ms)",
                self.storage.name(),
                record.key,
                record.duration().num_milliseconds()
            );
            self.ledger.set(dedup, record);
            self.stats.files_uploaded.fetch_add(1, Ordering::Relaxed);
            uploaded += 1;
        }

        debug!("上传任务 #{} 完成: {} 个文件", self.id, uploaded);
        Ok(uploaded)
    }

    /// 上传单个文件，返回去重 key 和上传记录
    async fn upload_file(&self, path: &Path) -> Result<(String, UploadRecord), SyncError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| SyncError::OpenFile {
                path: path.to_path_buf(),
                source: e,
            })?;

        let name = dedup_key(path).ok_or_else(|| SyncError::OpenFile {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "file name is not valid UTF-8"),
        })?;
        let key = remote_key(&self.key_prefix, &name);
        let size = file.metadata().await.ok().map(|m| m.len());

        let started_at = Utc::now();

        let stats = self.stats.clone();
        let stream: ByteStream = Box::pin(
            ReaderStream::new(file)
                .inspect_ok(move |chunk| {
                    stats
                        .bytes_transferred
                        .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                })
                .map_err(anyhow::Error::from),
        );

        self.storage
            .write_stream(&key, stream, size)
            .await
            .map_err(|e| SyncError::Transfer {
                path: path.to_path_buf(),
                key: key.clone(),
                source: e,
            })?;

        let finished_at = Utc::now();
        Ok((name, UploadRecord::new(key, started_at, finished_at)))
    }
}
