//! 实时数据库REST客户端
//!
//! 路径约定：`{base}/users/{uid}/history.json`。
//! POST 追加子节点并返回 `{"name": "<key>"}`，GET 返回 `null` 或 键->对象 映射。

use crate::store::{order_children, HistoryStore, StoredChild, UserId};
use crate::utils::error::DetectError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

pub struct RealtimeDbStore {
    client: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl RealtimeDbStore {
    pub fn new(base_url: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/')).map_err(|e| {
            DetectError::Config(format!("Invalid store base URL {}: {}", base_url, e))
        })?;

        if base_url.cannot_be_a_base() {
            return Err(DetectError::Config(format!(
                "Store base URL cannot be used as a base: {}",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DetectError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    /// 用户历史分区的REST地址
    pub fn history_url(&self, user: &UserId) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DetectError::Config(format!("Invalid store base URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["users", user.as_str(), "history.json"]);

        if let Some(token) = &self.auth_token {
            url.query_pairs_mut().append_pair("auth", token);
        }

        Ok(url)
    }

    fn parse_children(body: Value, path: &str) -> Result<Vec<StoredChild>> {
        match body {
            Value::Null => Ok(Vec::new()),
            Value::Object(map) => Ok(map
                .into_iter()
                .map(|(key, value)| StoredChild { key, value })
                .collect()),
            other => Err(DetectError::Persistence(format!(
                "Unexpected payload at {}: expected object, got {}",
                path,
                json_type(&other)
            ))),
        }
    }
}

#[async_trait]
impl HistoryStore for RealtimeDbStore {
    async fn append(&self, user: &UserId, entry: Value) -> Result<String> {
        let url = self.history_url(user)?;

        let response = self
            .client
            .post(url)
            .json(&entry)
            .send()
            .await?
            .error_for_status()?;

        let pushed: PushResponse = response.json().await?;
        tracing::debug!("Appended {} under {}", pushed.name, user.history_path());

        Ok(pushed.name)
    }

    async fn read_ordered(&self, user: &UserId, order_by: &str) -> Result<Vec<StoredChild>> {
        let url = self.history_url(user)?;

        // 服务端排序依赖索引配置，且JSON对象本身无序，这里统一在客户端排序
        let body: Value = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut children = Self::parse_children(body, &user.history_path())?;
        order_children(&mut children, order_by);

        Ok(children)
    }

    fn backend_name(&self) -> &'static str {
        "realtime"
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
