//! 上传记录账本
//!
//! 记录每个已成功上传的文件，进程启动时从快照加载，结束时整体写回。
//! 所有操作（读、写、加载、保存）共用一把互斥锁。

use crate::error::SnapshotError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// 一次完成的上传
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    /// 对象在远端存储中的 key
    #[serde(alias = "Key")]
    pub key: String,
    #[serde(alias = "Start")]
    pub started_at: DateTime<Utc>,
    #[serde(alias = "End")]
    pub finished_at: DateTime<Utc>,
}

impl UploadRecord {
    /// 创建记录，结束时间不会早于开始时间（墙上时钟可能回拨）
    pub fn new(key: impl Into<String>, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            started_at,
            finished_at: finished_at.max(started_at),
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// 计算去重 key：文件名（不含目录）
///
/// 扫描器的排除检查和上传器的记录写入都必须使用这个函数。
pub fn dedup_key(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

/// 线程安全的 去重 key -> 上传记录 映射
#[derive(Debug, Default)]
pub struct Ledger {
    items: Mutex<HashMap<String, UploadRecord>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// map 中只有普通数据，锁中毒时直接取回内容继续使用
    fn lock(&self) -> MutexGuard<'_, HashMap<String, UploadRecord>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 返回记录的副本
    pub fn get(&self, key: &str) -> Option<UploadRecord> {
        self.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// 插入或覆盖
    pub fn set(&self, key: impl Into<String>, record: UploadRecord) {
        self.lock().insert(key.into(), record);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 当前内容的完整副本
    pub fn entries(&self) -> HashMap<String, UploadRecord> {
        self.lock().clone()
    }

    /// 用快照内容替换内存中的记录
    ///
    /// 文件不存在时账本为空并返回成功，其他读取或解析失败都是硬错误。
    pub fn load(&self, path: &Path) -> Result<usize, SnapshotError> {
        let mut items = self.lock();

        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                items.clear();
                info!("快照文件不存在，从空账本开始: {:?}", path);
                return Ok(0);
            }
            Err(e) => {
                return Err(SnapshotError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let loaded: HashMap<String, UploadRecord> =
            serde_json::from_slice(&data).map_err(|e| SnapshotError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?;

        if let Some((key, _)) = loaded
            .iter()
            .find(|(_, record)| record.finished_at < record.started_at)
        {
            return Err(SnapshotError::InvalidRecord {
                path: path.to_path_buf(),
                key: key.clone(),
            });
        }

        *items = loaded;
        info!("已从 {:?} 加载 {} 条上传记录", path, items.len());
        Ok(items.len())
    }

    /// 把全部记录写入快照，覆盖已有文件
    ///
    /// 写入不是原子的：中途崩溃可能留下截断的文件。失败时内存状态不变。
    pub fn save(&self, path: &Path) -> Result<usize, SnapshotError> {
        let items = self.lock();
        let write_err = |e: std::io::Error| SnapshotError::Write {
            path: path.to_path_buf(),
            source: e,
        };

        // 按 key 排序，便于人工查看和比对
        let sorted: BTreeMap<&String, &UploadRecord> = items.iter().collect();

        let file = File::create(path).map_err(write_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &sorted).map_err(|e| {
            SnapshotError::Serialize {
                path: path.to_path_buf(),
                source: e,
            }
        })?;
        writer.write_all(b"\n").map_err(write_err)?;
        writer.flush().map_err(write_err)?;

        debug!("已保存 {} 条上传记录到 {:?}", items.len(), path);
        Ok(items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn record(key: &str, start_secs: i64, end_secs: i64) -> UploadRecord {
        UploadRecord::new(
            key,
            Utc.timestamp_opt(start_secs, 0).unwrap(),
            Utc.timestamp_opt(end_secs, 0).unwrap(),
        )
    }

    #[test]
    fn test_dedup_key_is_base_name() {
        assert_eq!(dedup_key(Path::new("/data/in/a.txt")).as_deref(), Some("a.txt"));
        assert_eq!(dedup_key(Path::new("a.txt")).as_deref(), Some("a.txt"));
        assert_eq!(dedup_key(Path::new("/")), None);
    }

    #[test]
    fn test_record_end_never_before_start() {
        let r = record("k", 100, 50);
        assert!(r.finished_at >= r.started_at);
        assert_eq!(r.duration(), chrono::Duration::zero());
    }

    #[test]
    fn test_get_returns_copy() {
        let ledger = Ledger::new();
        ledger.set("a.txt", record("p/a.txt", 1, 2));

        let mut copy = ledger.get("a.txt").unwrap();
        copy.key = "changed".into();

        assert_eq!(ledger.get("a.txt").unwrap().key, "p/a.txt");
        assert!(ledger.get("missing").is_none());
    }

    #[test]
    fn test_set_overwrites() {
        let ledger = Ledger::new();
        ledger.set("a.txt", record("old", 1, 2));
        ledger.set("a.txt", record("new", 3, 4));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get("a.txt").unwrap().key, "new");
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploadRecord.json");

        let cases: Vec<Vec<(&str, UploadRecord)>> = vec![
            vec![],
            vec![("a.txt", record("a.txt", 10, 20))],
            vec![
                ("a.txt", record("backup/a.txt", 10, 20)),
                ("b.txt", record("backup/b.txt", 11, 11)),
                ("c.bin", record("backup/c.bin", 12, 40)),
            ],
        ];

        for entries in cases {
            let ledger = Ledger::new();
            for (k, r) in &entries {
                ledger.set(*k, r.clone());
            }
            ledger.save(&path).unwrap();

            let restored = Ledger::new();
            let count = restored.load(&path).unwrap();
            assert_eq!(count, entries.len());
            assert_eq!(restored.entries(), ledger.entries());
        }
    }

    #[test]
    fn test_load_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new();
        ledger.set("stale", record("stale", 1, 2));

        let count = ledger.load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(count, 0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_load_malformed_snapshot_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploadRecord.json");

        for content in ["", "{\"a.txt\": {\"key\": ", "[1, 2, 3]"] {
            std::fs::write(&path, content).unwrap();
            let err = Ledger::new().load(&path).unwrap_err();
            assert!(matches!(err, SnapshotError::Parse { .. }), "{content:?}: {err}");
        }
    }

    #[test]
    fn test_load_rejects_inverted_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploadRecord.json");
        std::fs::write(
            &path,
            r#"{"a.txt": {"key": "a.txt", "startedAt": "2024-01-02T00:00:00Z", "finishedAt": "2024-01-01T00:00:00Z"}}"#,
        )
        .unwrap();

        let err = Ledger::new().load(&path).unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidRecord { ref key, .. } if key == "a.txt"));
    }

    #[test]
    fn test_load_accepts_legacy_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploadRecord.json");
        std::fs::write(
            &path,
            r#"{
  "a.txt": {
    "Key": "photos/a.txt",
    "Start": "2024-03-01T10:00:00.123456789-05:00",
    "End": "2024-03-01T10:00:02-05:00"
  }
}"#,
        )
        .unwrap();

        let ledger = Ledger::new();
        assert_eq!(ledger.load(&path).unwrap(), 1);
        let r = ledger.get("a.txt").unwrap();
        assert_eq!(r.key, "photos/a.txt");
        assert_eq!(r.started_at.to_rfc3339(), "2024-03-01T15:00:00.123456789+00:00");
    }

    #[test]
    fn test_save_writes_camel_case_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploadRecord.json");
        let ledger = Ledger::new();
        ledger.set("a.txt", record("a.txt", 10, 20));
        ledger.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"startedAt\""));
        assert!(text.contains("\"finishedAt\""));
    }

    #[test]
    fn test_save_to_unwritable_path_keeps_memory() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new();
        ledger.set("a.txt", record("a.txt", 10, 20));

        let err = ledger.save(&dir.path().join("missing").join("x.json")).unwrap_err();
        assert!(matches!(err, SnapshotError::Write { .. }));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_concurrent_set_loses_nothing() {
        let ledger = Arc::new(Ledger::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        let key = format!("file-{}-{}", t, i);
                        ledger.set(key.clone(), record(&key, 1, 2));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ledger.len(), 8 * 250);
    }
}
