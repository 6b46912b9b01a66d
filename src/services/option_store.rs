use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use crate::config::UpstreamConfig;
use crate::error::StoreError;
use crate::models::{ApiResponse, OptionItem, SegmentedRatioRecord};

/// 上游选项存储与分段倍率存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RatioStore: Send + Sync {
    /// `GET /api/option/`
    async fn list_options(&self) -> Result<Vec<OptionItem>, StoreError>;
    /// `PUT /api/option/`
    async fn put_option(&self, item: &OptionItem) -> Result<(), StoreError>;
    /// `GET /api/segmented_ratio/`
    async fn list_segmented(&self) -> Result<HashMap<String, SegmentedRatioRecord>, StoreError>;
    /// `POST /api/segmented_ratio/`
    async fn upsert_segmented(&self, record: &SegmentedRatioRecord) -> Result<(), StoreError>;
    /// `DELETE /api/segmented_ratio/{model_name}`
    async fn delete_segmented(&self, model_name: &str) -> Result<(), StoreError>;
}

/// 基于 HTTP 的上游存储客户端
pub struct HttpRatioStore {
    client: Client,
    base_url: Url,
    access_token: Option<String>,
    user_id: Option<String>,
}

impl HttpRatioStore {
    pub fn new(config: &UpstreamConfig) -> Result<Self, StoreError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| StoreError::InvalidBaseUrl(format!("{}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::InvalidBaseUrl(config.base_url.clone()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        info!("上游倍率存储地址: {}", base_url);

        Ok(Self {
            client,
            base_url,
            access_token: config.access_token.clone(),
            user_id: config.user_id.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut builder = self.client.request(method, url);
        if let Some(token) = &self.access_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(user_id) = &self.user_id {
            builder = builder.header("New-Api-User", user_id);
        }
        builder
    }

    /// 发送请求并拆开 `{success, message, data}` 信封
    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<Option<T>, StoreError> {
        let response = builder.send().await?;
        let status = response.status();
        let url = response.url().clone();
        let body = response.bytes().await?;

        let envelope: ApiResponse<T> = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => {
                error!("解析上游响应失败: url={}, error={}", url, e);
                return Err(StoreError::Decode(e));
            }
            Err(_) => {
                error!("上游请求失败: url={}, HTTP {}", url, status);
                return Err(StoreError::Rejected(format!("HTTP {}", status)));
            }
        };

        if !envelope.success {
            let message = if envelope.message.is_empty() {
                format!("HTTP {}", status)
            } else {
                envelope.message
            };
            error!("上游拒绝请求: url={}, message={}", url, message);
            return Err(StoreError::Rejected(message));
        }

        debug!("上游请求成功: url={}, HTTP {}", url, status);
        Ok(envelope.data)
    }
}

#[async_trait]
impl RatioStore for HttpRatioStore {
    async fn list_options(&self) -> Result<Vec<OptionItem>, StoreError> {
        let url = self.endpoint(&["api", "option", ""])?;
        let items: Option<Vec<OptionItem>> = self.send(self.request(Method::GET, url)).await?;
        Ok(items.unwrap_or_default())
    }

    async fn put_option(&self, item: &OptionItem) -> Result<(), StoreError> {
        let url = self.endpoint(&["api", "option", ""])?;
        self.send::<serde_json::Value>(self.request(Method::PUT, url).json(item))
            .await?;
        info!("已更新系统选项: {}", item.key);
        Ok(())
    }

    async fn list_segmented(&self) -> Result<HashMap<String, SegmentedRatioRecord>, StoreError> {
        let url = self.endpoint(&["api", "segmented_ratio", ""])?;
        let records: Option<HashMap<String, SegmentedRatioRecord>> =
            self.send(self.request(Method::GET, url)).await?;
        Ok(records.unwrap_or_default())
    }

    async fn upsert_segmented(&self, record: &SegmentedRatioRecord) -> Result<(), StoreError> {
        let url = self.endpoint(&["api", "segmented_ratio", ""])?;
        self.send::<serde_json::Value>(self.request(Method::POST, url).json(record))
            .await?;
        info!(
            "已保存分段倍率配置: model={}, rules={}",
            record.model_name,
            record.rules.len()
        );
        Ok(())
    }

    async fn delete_segmented(&self, model_name: &str) -> Result<(), StoreError> {
        let url = self.endpoint(&["api", "segmented_ratio", model_name])?;
        self.send::<serde_json::Value>(self.request(Method::DELETE, url))
            .await?;
        info!("已删除分段倍率配置: model={}", model_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(base_url: &str) -> HttpRatioStore {
        HttpRatioStore::new(&UpstreamConfig {
            base_url: base_url.to_string(),
            access_token: None,
            user_id: None,
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn endpoints_keep_trailing_slash_and_base_path() {
        let store = store("http://127.0.0.1:3000/gateway/");
        assert_eq!(
            store.endpoint(&["api", "option", ""]).unwrap().as_str(),
            "http://127.0.0.1:3000/gateway/api/option/"
        );
    }

    #[test]
    fn model_names_are_percent_encoded() {
        let store = store("http://127.0.0.1:3000");
        assert_eq!(
            store
                .endpoint(&["api", "segmented_ratio", "deepseek-ai/DeepSeek V3"])
                .unwrap()
                .as_str(),
            "http://127.0.0.1:3000/api/segmented_ratio/deepseek-ai%2FDeepSeek%20V3"
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        let result = HttpRatioStore::new(&UpstreamConfig {
            base_url: "not a url".to_string(),
            access_token: None,
            user_id: None,
            timeout_secs: 5,
        });
        assert!(matches!(result, Err(StoreError::InvalidBaseUrl(_))));
    }
}
