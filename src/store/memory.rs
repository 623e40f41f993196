use crate::store::{order_children, HistoryStore, StoredChild, UserId};
use crate::utils::error::DetectError;
use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// 进程内历史记录存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    partitions: RwLock<HashMap<String, Vec<StoredChild>>>,
    sequence: AtomicU64,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟连接中断：之后的读写都会失败
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// 直接写入原始子节点（用于导入已有数据）
    pub fn insert_raw(&self, user: &UserId, key: impl Into<String>, value: Value) {
        self.partitions
            .write()
            .entry(user.as_str().to_string())
            .or_default()
            .push(StoredChild {
                key: key.into(),
                value,
            });
    }

    pub fn len(&self, user: &UserId) -> usize {
        self.partitions
            .read()
            .get(user.as_str())
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn check_online(&self, operation: &str, user: &UserId) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DetectError::Persistence(format!(
                "{} failed for {}: store unreachable",
                operation,
                user.history_path()
            )));
        }
        Ok(())
    }

    /// 按追加顺序递增的键
    fn next_key(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        format!("m{:012}-{}", seq, &uuid::Uuid::new_v4().simple().to_string()[..8])
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append(&self, user: &UserId, entry: Value) -> Result<String> {
        self.check_online("append", user)?;

        let key = self.next_key();
        self.insert_raw(user, key.clone(), entry);

        tracing::debug!("Appended {} under {}", key, user.history_path());
        Ok(key)
    }

    async fn read_ordered(&self, user: &UserId, order_by: &str) -> Result<Vec<StoredChild>> {
        self.check_online("read", user)?;

        let mut children = self
            .partitions
            .read()
            .get(user.as_str())
            .cloned()
            .unwrap_or_default();
        order_children(&mut children, order_by);

        Ok(children)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_assigns_unique_keys() {
        let store = MemoryStore::new();
        let user = UserId::parse("alice").unwrap();

        let k1 = store.append(&user, json!({"timestamp": "2024-01-01 00:00:00"})).await.unwrap();
        let k2 = store.append(&user, json!({"timestamp": "2024-01-01 00:00:00"})).await.unwrap();

        assert_ne!(k1, k2);
        assert_eq!(store.len(&user), 2);
    }

    #[tokio::test]
    async fn test_partitions_are_isolated() {
        let store = MemoryStore::new();
        let alice = UserId::parse("alice").unwrap();
        let bob = UserId::parse("bob").unwrap();

        store.append(&alice, json!({"timestamp": "1"})).await.unwrap();

        assert_eq!(store.read_ordered(&alice, "timestamp").await.unwrap().len(), 1);
        assert!(store.read_ordered(&bob, "timestamp").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_store_fails() {
        let store = MemoryStore::new();
        let user = UserId::parse("alice").unwrap();
        store.set_offline(true);

        let err = store.append(&user, json!({})).await.unwrap_err();
        assert!(matches!(err, DetectError::Persistence(_)));
        assert!(store.read_ordered(&user, "timestamp").await.is_err());

        store.set_offline(false);
        assert!(store.read_ordered(&user, "timestamp").await.unwrap().is_empty());
    }
}
