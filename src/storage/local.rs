use super::{ByteStream, Storage};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// 以本地目录充当远端存储
pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalStorage {
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = path.into();
        fs::create_dir_all(&base_path).await?;
        let name = format!("local:{}", base_path.display());
        Ok(Self { base_path, name })
    }

    fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() || path.split(['/', '\\']).any(|part| part == "..") {
            anyhow::bail!("invalid object key: {:?}", path);
        }
        Ok(self.base_path.join(path))
    }

    /// 临时文件路径：同目录下加 .tmp 后缀
    fn temp_path(full_path: &Path) -> PathBuf {
        let mut name = full_path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        let stream: ByteStream = Box::pin(futures::stream::once(async move { Ok::<_, anyhow::Error>(data) }));
        self.write_stream(path, stream, None).await
    }

    async fn write_stream(
        &self,
        path: &str,
        mut stream: ByteStream,
        _total_size: Option<u64>,
    ) -> Result<()> {
        let full_path = self.resolve_path(path)?;

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 使用临时文件写入，然后原子重命名
        let temp_path = Self::temp_path(&full_path);
        let result: Result<()> = async {
            let mut file = fs::File::create(&temp_path).await?;
            while let Some(chunk) = stream.try_next().await? {
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        fs::rename(&temp_path, &full_path).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
