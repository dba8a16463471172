//! KV 存储模块 - 基于 sled 的偏好/状态存储
//!
//! 本模块提供：
//! - 横幅忽略时间戳（按角色）
//! - 进行中任务的“面包屑”
//! - `PreferenceStore` 抽象，业务代码只依赖该接口，测试使用内存实现

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use sled::{Db, Tree};

use crate::error::{StudioSDKError, Result};

const PREFERENCES_TREE: &str = "preferences";

/// 简单持久化键值接口
pub trait PreferenceStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Value>>;
    fn save(&self, key: &str, value: Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// 带类型的读写辅助
pub trait PreferenceStoreExt: PreferenceStore {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.load(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.save(key, serde_json::to_value(value)?)
    }
}

impl<S: PreferenceStore + ?Sized> PreferenceStoreExt for S {}

/// KV 存储组件
#[derive(Debug, Clone)]
pub struct KvStore {
    tree: Tree,
}

impl KvStore {
    /// 在已打开的 sled 数据库上创建 KV 存储
    pub fn new(db: &Db) -> Result<Self> {
        let tree = db
            .open_tree(PREFERENCES_TREE)
            .map_err(|e| StudioSDKError::KvStore(format!("打开偏好 Tree 失败: {}", e)))?;
        Ok(Self { tree })
    }

    /// 设置键值对
    pub fn set<K, V>(&self, key: K, value: &V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: Serialize,
    {
        let value_bytes = serde_json::to_vec(value)
            .map_err(|e| StudioSDKError::Serialization(format!("序列化值失败: {}", e)))?;
        self.tree
            .insert(key, value_bytes)
            .map_err(|e| StudioSDKError::KvStore(format!("设置键值对失败: {}", e)))?;
        Ok(())
    }

    /// 获取键值对
    pub fn get<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]>,
        V: DeserializeOwned,
    {
        let result = self
            .tree
            .get(key)
            .map_err(|e| StudioSDKError::KvStore(format!("获取键值对失败: {}", e)))?;
        match result {
            Some(value_bytes) => {
                let value = serde_json::from_slice(&value_bytes)
                    .map_err(|e| StudioSDKError::Serialization(format!("反序列化值失败: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// 删除键值对
    pub fn delete<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        let removed = self
            .tree
            .remove(key)
            .map_err(|e| StudioSDKError::KvStore(format!("删除键值对失败: {}", e)))?;
        Ok(removed.is_some())
    }

    /// 检查键是否存在
    pub fn exists<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        self.tree
            .contains_key(key)
            .map_err(|e| StudioSDKError::KvStore(format!("检查键存在失败: {}", e)))
    }

    /// 获取指定前缀的所有键值对
    pub fn scan_prefix<V: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(String, V)>> {
        let mut results = Vec::new();
        for item in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, value_bytes) =
                item.map_err(|e| StudioSDKError::KvStore(format!("扫描前缀失败: {}", e)))?;
            let value = serde_json::from_slice(&value_bytes)
                .map_err(|e| StudioSDKError::Serialization(format!("反序列化值失败: {}", e)))?;
            results.push((String::from_utf8_lossy(&key).into_owned(), value));
        }
        Ok(results)
    }

    /// 刷盘
    pub async fn flush(&self) -> Result<()> {
        self.tree
            .flush_async()
            .await
            .map_err(|e| StudioSDKError::KvStore(format!("刷盘失败: {}", e)))?;
        Ok(())
    }
}

impl PreferenceStore for KvStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        self.get(key)
    }

    fn save(&self, key: &str, value: Value) -> Result<()> {
        self.set(key, &value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.delete(key).map(|_| ())
    }
}

/// 内存实现（测试、无持久化宿主）
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn save(&self, key: &str, value: Value) -> Result<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// 常用的键前缀常量
pub mod keys {
    /// 同步横幅忽略时间戳前缀（后接角色 ID）
    pub const BANNER_DISMISSED: &str = "sync_banner_dismissed_";
    /// 进行中的任务面包屑（全局唯一）
    pub const ACTIVE_JOB: &str = "active_job";

    pub fn banner_dismissed(owner_id: &str) -> String {
        format!("{}{}", BANNER_DISMISSED, owner_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, KvStore) {
        let temp_dir = TempDir::new().unwrap();
        let db = sled::open(temp_dir.path().join("kv")).unwrap();
        let store = KvStore::new(&db).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_kv_store_basic_operations() {
        let (_dir, store) = open_store();

        let test_data = json!({ "name": "test", "value": 123 });
        store.set("test_key", &test_data).unwrap();
        let retrieved: serde_json::Value = store.get("test_key").unwrap().unwrap();
        assert_eq!(retrieved, test_data);

        assert!(store.exists("test_key").unwrap());
        assert!(!store.exists("non_existent_key").unwrap());

        assert!(store.delete("test_key").unwrap());
        let deleted: Option<serde_json::Value> = store.get("test_key").unwrap();
        assert!(deleted.is_none());
    }

    #[test]
    fn test_kv_store_scan_prefix() {
        let (_dir, store) = open_store();

        store.set(keys::banner_dismissed("a"), &1i64).unwrap();
        store.set(keys::banner_dismissed("b"), &2i64).unwrap();
        store.set(keys::ACTIVE_JOB, &json!({"job_id": "j"})).unwrap();

        let results: Vec<(String, i64)> = store.scan_prefix(keys::BANNER_DISMISSED).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|(k, v)| k.ends_with("_a") && *v == 1));
    }

    #[test]
    fn test_preference_store_ext_typed_roundtrip() {
        let (_dir, store) = open_store();
        let prefs: &dyn PreferenceStore = &store;

        prefs.set_json("k", &vec![1u32, 2, 3]).unwrap();
        let back: Option<Vec<u32>> = prefs.get_json("k").unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));

        prefs.remove("k").unwrap();
        let gone: Option<Vec<u32>> = prefs.get_json("k").unwrap();
        assert!(gone.is_none());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryPreferenceStore::new();
        store.set_json("x", &"y").unwrap();
        assert_eq!(store.len(), 1);
        store.remove("x").unwrap();
        assert!(store.is_empty());
    }
}
