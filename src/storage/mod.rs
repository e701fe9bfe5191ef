pub mod local;
pub mod s3;

use anyhow::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

pub use local::LocalStorage;
pub use s3::S3Storage;

use crate::config::BackendConfig;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）
pub const IO_TIMEOUT_SECS: u64 = 300;
/// 流式上传的分块大小
pub const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// 上传内容的字节流
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// 远端存储接口，bucket 在创建实例时绑定
#[async_trait]
pub trait Storage: Send + Sync {
    /// 写入整个对象
    async fn write(&self, path: &str, data: Bytes) -> Result<()>;

    /// 流式写入（用于大文件）
    async fn write_stream(
        &self,
        path: &str,
        mut stream: ByteStream,
        total_size: Option<u64>,
    ) -> Result<()> {
        // 默认实现：收集所有数据后写入
        use futures::TryStreamExt;
        let mut data = BytesMut::with_capacity(total_size.unwrap_or(0) as usize);
        while let Some(chunk) = stream.try_next().await? {
            data.extend_from_slice(&chunk);
        }
        self.write(path, data.freeze()).await
    }

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建存储实例
pub async fn create_storage(bucket: &str, config: &BackendConfig) -> Result<Arc<dyn Storage>> {
    match config {
        BackendConfig::S3 { region, endpoint } => {
            tracing::info!("初始化S3存储: bucket={}, region={:?}", bucket, region);
            Ok(Arc::new(S3Storage::new(bucket, region.clone(), endpoint.clone())?) as Arc<dyn Storage>)
        }
        BackendConfig::Local { root } => {
            tracing::info!("初始化本地存储: {:?}/{}", root, bucket);
            Ok(Arc::new(LocalStorage::new(root.join(bucket)).await?) as Arc<dyn Storage>)
        }
    }
}
