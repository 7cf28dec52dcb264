//! 存储协作者：键值契约
//!
//! 会话管理器把整张会话表作为一个值写在固定键下。写入是同步、尽力而为的：
//! 失败只作为诊断上报，不回滚内存状态。

mod file;

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;
use thiserror::Error;

pub use file::JsonFileStore;

/// 存储错误
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// 已存储内容无法解析
    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// 键值存储接口
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// 读取，键不存在时返回 default（读取失败仍返回错误，由调用方决定如何自愈）
    fn get_or(&self, key: &str, default: Value) -> Result<Value, StorageError> {
        Ok(self.get(key)?.unwrap_or(default))
    }
}

/// 内存存储（测试与无盘运行）
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".into()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".into()))?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_store_get_set_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        assert_eq!(store.get_or("k", json!({})).unwrap(), json!({}));

        store.set("k", json!({"a": 1})).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!({"a": 1})));

        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }
}
