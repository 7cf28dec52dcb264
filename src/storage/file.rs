//! JSON 文件存储：整个存储是一个 JSON 对象，每个键是其中一个顶层字段

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};

use super::{KeyValueStore, StorageError};

/// 单文件 JSON 存储；父目录不存在时写入会自动创建
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    /// 串行化读-改-写
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Map<String, Value>, StorageError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        if data.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&data) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StorageError::Corrupt(format!(
                "{} is not a JSON object",
                self.path.display()
            ))),
            Err(e) => Err(StorageError::Corrupt(e.to_string())),
        }
    }

    fn write_document(&self, document: Map<String, Value>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(&Value::Object(document))
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn with_lock<R>(
        &self,
        f: impl FnOnce() -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StorageError::Unavailable("file store lock poisoned".into()))?;
        f()
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.with_lock(|| Ok(self.read_document()?.get(key).cloned()))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.with_lock(|| {
            // 文件已损坏时以空文档覆盖，新写入优先
            let mut document = self.read_document().unwrap_or_default();
            document.insert(key.to_string(), value);
            self.write_document(document)
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.with_lock(|| {
            let mut document = self.read_document().unwrap_or_default();
            if document.remove(key).is_some() {
                self.write_document(document)?;
            }
            Ok(())
        })
    }
}
