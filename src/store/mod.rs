pub mod memory;
pub mod realtime;

pub use memory::MemoryStore;
pub use realtime::RealtimeDbStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::utils::error::DetectError;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// 用户标识（存储分区键）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    const MAX_LEN: usize = 768;

    pub fn parse(raw: &str) -> Result<Self> {
        let id = raw.trim();

        if id.is_empty() {
            return Err(DetectError::InvalidInput("User id cannot be empty".to_string()));
        }
        if id.len() > Self::MAX_LEN {
            return Err(DetectError::InvalidInput(format!(
                "User id longer than {} bytes",
                Self::MAX_LEN
            )));
        }
        // 存储路径中的保留字符
        if let Some(c) = id
            .chars()
            .find(|c| matches!(c, '/' | '.' | '#' | '$' | '[' | ']') || c.is_ascii_control())
        {
            return Err(DetectError::InvalidInput(format!(
                "User id contains reserved character {:?}",
                c
            )));
        }

        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 该用户历史记录所在路径
    pub fn history_path(&self) -> String {
        format!("users/{}/history", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 存储中的一个子节点
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChild {
    pub key: String,
    pub value: Value,
}

/// 历史记录存储：只追加，按字段有序读取
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// 在用户历史分区下追加一个子节点，返回存储分配的键
    async fn append(&self, user: &UserId, entry: Value) -> Result<String>;

    /// 读取用户历史分区下的全部子节点，按指定字段升序
    async fn read_ordered(&self, user: &UserId, order_by: &str) -> Result<Vec<StoredChild>>;

    fn backend_name(&self) -> &'static str;
}

/// 按配置创建存储后端
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn HistoryStore>> {
    match &config.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory history store, records are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Realtime {
            base_url,
            auth_token,
        } => {
            tracing::info!("Using realtime database history store at {}", base_url);
            Ok(Arc::new(RealtimeDbStore::new(
                base_url,
                auth_token.clone(),
                Duration::from_secs(config.request_timeout),
            )?))
        }
    }
}

/// 子节点排序规则：缺失/null < false < true < 数字 < 字符串 < 对象，同值按键排序
pub fn order_children(children: &mut [StoredChild], field: &str) {
    children.sort_by(|a, b| {
        compare_values(a.value.get(field), b.value.get(field)).then_with(|| a.key.cmp(&b.key))
    });
}

fn value_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(false)) => 1,
        Some(Value::Bool(true)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) | Some(Value::Object(_)) => 5,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => value_rank(a).cmp(&value_rank(b)),
    }
}
