use super::{ByteStream, Storage, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS, UPLOAD_CHUNK_SIZE};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Operator};
use std::time::Duration;

/// S3 兼容存储，凭证从标准 AWS 环境变量读取
pub struct S3Storage {
    operator: Operator,
    name: String,
}

impl S3Storage {
    pub fn new(bucket: &str, region: Option<String>, endpoint: Option<String>) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default().bucket(bucket);

        if let Some(ref r) = region {
            builder = builder.region(r);
        }

        if let Some(ref ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        Ok(Self {
            operator,
            name: format!("s3://{}", bucket),
        })
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        self.operator.write(path, data).await?;
        Ok(())
    }

    async fn write_stream(
        &self,
        path: &str,
        mut stream: ByteStream,
        _total_size: Option<u64>,
    ) -> Result<()> {
        let mut writer = self
            .operator
            .writer_with(path)
            .chunk(UPLOAD_CHUNK_SIZE)
            .await?;

        let result: Result<()> = async {
            while let Some(chunk) = stream.try_next().await? {
                writer.write(chunk).await?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                writer.close().await?;
                Ok(())
            }
            Err(e) => {
                // 放弃未完成的分段上传
                if let Err(abort_err) = writer.abort().await {
                    tracing::warn!("取消上传失败: {} - {}", path, abort_err);
                }
                Err(e)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
