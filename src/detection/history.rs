use crate::detection::types::{DetectionRecord, UNKNOWN_TIMESTAMP};
use crate::store::{HistoryStore, StoredChild, UserId};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;

/// 历史记录读取结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "items", rename_all = "snake_case")]
pub enum HistoryView {
    /// 该用户还没有任何记录
    Empty,
    /// 最新的记录在前
    #[serde(rename = "ok")]
    Entries(Vec<DetectionRecord>),
}

impl HistoryView {
    pub fn records(&self) -> &[DetectionRecord] {
        match self {
            HistoryView::Empty => &[],
            HistoryView::Entries(records) => records,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

pub struct HistoryReader {
    store: Arc<dyn HistoryStore>,
}

impl HistoryReader {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self, user: &UserId) -> Result<HistoryView> {
        let children = self.store.read_ordered(user, "timestamp").await?;
        let total = children.len();

        let mut records: Vec<DetectionRecord> =
            children.into_iter().filter_map(parse_child).collect();
        // 存储按时间升序，展示时最新的在前
        records.reverse();

        if records.len() < total {
            tracing::warn!(
                "Skipped {} malformed history entries for user {}",
                total - records.len(),
                user
            );
        }

        if records.is_empty() {
            tracing::debug!("No history found for user: {}", user);
            return Ok(HistoryView::Empty);
        }

        tracing::debug!("Loaded {} history entries for user {}", records.len(), user);
        Ok(HistoryView::Entries(records))
    }
}

fn parse_child(child: StoredChild) -> Option<DetectionRecord> {
    let StoredChild { key, value } = child;

    let label = match value.get("disease").and_then(|v| v.as_str()) {
        Some(label) => label.to_string(),
        None => {
            tracing::warn!("Skipping history item {} without a label", key);
            return None;
        }
    };

    let confidence = value
        .get("confidence")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0) as f32;

    let timestamp = value
        .get("timestamp")
        .and_then(|v| v.as_str())
        .unwrap_or(UNKNOWN_TIMESTAMP)
        .to_string();

    let thumbnail = value
        .get("image")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Some(DetectionRecord {
        id: key,
        label,
        confidence,
        thumbnail,
        timestamp,
    })
}
