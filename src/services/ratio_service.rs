use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::error::{AppError, StoreError};
use crate::models::{RatioConfig, RatioModeKind, SegmentedRatioRecord};
use crate::services::option_store::RatioStore;
use crate::services::ratio_catalog::{merge_configs, FixedRatioTables};
use crate::services::ratio_engine::{resolve_effective_ratio, EffectiveRatio};

#[derive(Debug, Default)]
struct RatioSnapshot {
    configs: Vec<RatioConfig>,
    refreshed_at: Option<DateTime<Utc>>,
}

/// 缓存状态
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RatioCacheStatus {
    pub config_count: usize,
    pub segmented_count: usize,
    pub fixed_count: usize,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// 倍率配置服务：缓存上游配置，并负责保存、删除时的多存储协调
pub struct RatioService {
    store: Arc<dyn RatioStore>,
    cache: RwLock<RatioSnapshot>,
    /// 保存、删除都是对上游选项表的读改写，必须串行执行
    write_lock: Mutex<()>,
}

impl RatioService {
    pub fn new(store: Arc<dyn RatioStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(RatioSnapshot::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// 从上游重新加载全部配置，返回配置数量
    pub async fn refresh(&self) -> Result<usize, StoreError> {
        let configs = self.load_configs().await?;
        let count = configs.len();

        let mut cache = self.cache.write().await;
        *cache = RatioSnapshot {
            configs,
            refreshed_at: Some(Utc::now()),
        };

        info!("倍率配置已刷新, 共 {} 个模型", count);
        Ok(count)
    }

    async fn load_configs(&self) -> Result<Vec<RatioConfig>, StoreError> {
        let records = self.store.list_segmented().await?;
        let options = self.store.list_options().await?;
        let tables = FixedRatioTables::from_options(&options)?;

        let mut segmented = Vec::with_capacity(records.len());
        for (model_name, record) in records {
            match RatioConfig::try_from(record) {
                Ok(config) => segmented.push(config),
                Err(e) => warn!("跳过无效的分段倍率配置: model={}, error={}", model_name, e),
            }
        }

        Ok(merge_configs(segmented, &tables))
    }

    pub async fn list(&self) -> Vec<RatioConfig> {
        self.cache.read().await.configs.clone()
    }

    pub async fn get(&self, model_name: &str) -> Option<RatioConfig> {
        self.cache
            .read()
            .await
            .configs
            .iter()
            .find(|c| c.model_name == model_name)
            .cloned()
    }

    pub async fn status(&self) -> RatioCacheStatus {
        let cache = self.cache.read().await;
        let segmented_count = cache
            .configs
            .iter()
            .filter(|c| c.kind() == RatioModeKind::Segmented)
            .count();
        RatioCacheStatus {
            config_count: cache.configs.len(),
            segmented_count,
            fixed_count: cache.configs.len() - segmented_count,
            refreshed_at: cache.refreshed_at,
        }
    }

    /// 按缓存中的配置解析实际生效的计费参数
    pub async fn resolve(
        &self,
        model_name: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<EffectiveRatio, AppError> {
        let cache = self.cache.read().await;
        let config = cache
            .configs
            .iter()
            .find(|c| c.model_name == model_name)
            .ok_or_else(|| AppError::NotFound(model_name.to_string()))?;

        if !config.enabled {
            return Err(AppError::Disabled(model_name.to_string()));
        }

        Ok(resolve_effective_ratio(config, input_tokens, output_tokens)?)
    }

    /// 保存配置
    ///
    /// 切换计费模式时会清理另一种存储中的同名配置，保存后刷新缓存。
    pub async fn save(&self, config: RatioConfig) -> Result<RatioConfig, AppError> {
        config.validate()?;

        let _guard = self.write_lock.lock().await;
        let options = self.store.list_options().await?;
        let mut tables = FixedRatioTables::from_options(&options)?;

        match SegmentedRatioRecord::from_config(&config) {
            Some(record) => {
                self.store.upsert_segmented(&record).await?;
                if tables.remove(&config.model_name) {
                    info!("模型 {} 切换为分段倍率, 清理固定倍率", config.model_name);
                    self.write_tables(&tables).await?;
                }
            }
            None => {
                tables.apply(&config)?;
                self.write_tables(&tables).await?;
                let segmented = self.store.list_segmented().await?;
                if segmented.contains_key(&config.model_name) {
                    info!("模型 {} 切换为固定倍率, 删除分段倍率", config.model_name);
                    self.store.delete_segmented(&config.model_name).await?;
                }
            }
        }

        self.refresh().await?;
        info!("倍率配置已保存: model={}, mode={:?}", config.model_name, config.kind());

        Ok(self.get(&config.model_name).await.unwrap_or(config))
    }

    /// 删除配置，返回被删除配置的计费模式
    pub async fn delete(&self, model_name: &str) -> Result<RatioModeKind, AppError> {
        let _guard = self.write_lock.lock().await;
        let segmented = self.store.list_segmented().await?;
        let kind = if segmented.contains_key(model_name) {
            self.store.delete_segmented(model_name).await?;
            RatioModeKind::Segmented
        } else {
            let options = self.store.list_options().await?;
            let mut tables = FixedRatioTables::from_options(&options)?;
            if !tables.contains(model_name) {
                return Err(AppError::NotFound(model_name.to_string()));
            }
            tables.remove(model_name);
            self.write_tables(&tables).await?;
            RatioModeKind::Fixed
        };

        self.refresh().await?;
        info!("倍率配置已删除: model={}, mode={:?}", model_name, kind);
        Ok(kind)
    }

    async fn write_tables(&self, tables: &FixedRatioTables) -> Result<(), StoreError> {
        let items = tables.to_option_items()?;
        try_join_all(items.iter().map(|item| self.store.put_option(item))).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PricingError;
    use crate::models::{
        FixedRatio, OptionItem, SegmentRule, COMPLETION_RATIO_KEY, MODEL_PRICE_KEY,
        MODEL_RATIO_KEY,
    };
    use crate::services::option_store::MockRatioStore;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn options() -> Vec<OptionItem> {
        vec![
            OptionItem::new(MODEL_PRICE_KEY, r#"{"mj_imagine": 0.1}"#),
            OptionItem::new(MODEL_RATIO_KEY, r#"{"gpt-4o": 1.25}"#),
            OptionItem::new(COMPLETION_RATIO_KEY, r#"{"gpt-4o": 4}"#),
        ]
    }

    fn segmented_records() -> HashMap<String, SegmentedRatioRecord> {
        let mut records = HashMap::new();
        records.insert(
            "gemini-2.5-pro".to_string(),
            SegmentedRatioRecord {
                model_name: "gemini-2.5-pro".to_string(),
                rules: vec![
                    SegmentRule::new(0.625, 8.0)
                        .with_input_range(None, Some(200000))
                        .with_priority(100),
                    SegmentRule::new(1.25, 6.0)
                        .with_input_range(Some(200000), None)
                        .with_priority(50),
                ],
                enabled: true,
            },
        );
        records.insert(
            "disabled-model".to_string(),
            SegmentedRatioRecord {
                model_name: "disabled-model".to_string(),
                rules: vec![SegmentRule::new(1.0, 1.0)],
                enabled: false,
            },
        );
        records.insert(
            "broken".to_string(),
            SegmentedRatioRecord {
                model_name: "broken".to_string(),
                rules: vec![],
                enabled: true,
            },
        );
        records
    }

    fn store_with_data() -> MockRatioStore {
        let mut store = MockRatioStore::new();
        store
            .expect_list_segmented()
            .returning(|| Ok(segmented_records()));
        store.expect_list_options().returning(|| Ok(options()));
        store
    }

    #[tokio::test]
    async fn refresh_merges_both_stores_and_skips_broken_records() {
        let service = RatioService::new(Arc::new(store_with_data()));
        assert_eq!(service.refresh().await.unwrap(), 4);

        let names: Vec<String> = service
            .list()
            .await
            .into_iter()
            .map(|c| c.model_name)
            .collect();
        assert_eq!(
            names,
            vec!["disabled-model", "gemini-2.5-pro", "gpt-4o", "mj_imagine"]
        );

        let status = service.status().await;
        assert_eq!(status.segmented_count, 2);
        assert_eq!(status.fixed_count, 2);
        assert!(status.refreshed_at.is_some());
    }

    #[tokio::test]
    async fn resolve_uses_cached_configs() {
        let service = RatioService::new(Arc::new(store_with_data()));
        service.refresh().await.unwrap();

        assert_eq!(
            service.resolve("gemini-2.5-pro", 300000, 1000).await.unwrap(),
            EffectiveRatio::Ratio {
                model_ratio: Some(1.25),
                completion_ratio: Some(6.0),
            }
        );
        assert_eq!(
            service.resolve("mj_imagine", 1, 1).await.unwrap(),
            EffectiveRatio::FixedPrice { fixed_price: 0.1 }
        );
        assert!(matches!(
            service.resolve("unknown", 1, 1).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            service.resolve("disabled-model", 1, 1).await,
            Err(AppError::Disabled(_))
        ));
    }

    #[tokio::test]
    async fn invalid_config_never_reaches_the_store() {
        let service = RatioService::new(Arc::new(MockRatioStore::new()));
        let result = service
            .save(RatioConfig::fixed("gpt-4o", FixedRatio::default()))
            .await;
        assert!(matches!(
            result,
            Err(AppError::Pricing(PricingError::MalformedConfig(_)))
        ));
    }

    #[tokio::test]
    async fn saving_segmented_config_clears_fixed_entries() {
        let mut store = MockRatioStore::new();
        store
            .expect_list_options()
            .times(2)
            .returning(|| Ok(options()));
        store
            .expect_upsert_segmented()
            .withf(|record| record.model_name == "gpt-4o" && record.rules.len() == 1)
            .times(1)
            .returning(|_| Ok(()));
        store
            .expect_put_option()
            .withf(|item| !item.value.contains("gpt-4o"))
            .times(3)
            .returning(|_| Ok(()));
        store
            .expect_list_segmented()
            .times(1)
            .returning(|| Ok(HashMap::new()));

        let service = RatioService::new(Arc::new(store));
        let config =
            RatioConfig::segmented("gpt-4o", vec![SegmentRule::new(1.0, 4.0)]).unwrap();
        service.save(config).await.unwrap();
    }

    #[tokio::test]
    async fn saving_fixed_config_removes_segmented_record() {
        let mut store = MockRatioStore::new();
        store.expect_list_options().returning(|| Ok(options()));
        store
            .expect_list_segmented()
            .returning(|| Ok(segmented_records()));
        store
            .expect_put_option()
            .times(3)
            .returning(|_| Ok(()));
        store
            .expect_delete_segmented()
            .with(eq("gemini-2.5-pro"))
            .times(1)
            .returning(|_| Ok(()));

        let service = RatioService::new(Arc::new(store));
        let config = RatioConfig::fixed(
            "gemini-2.5-pro",
            FixedRatio {
                fixed_price: None,
                model_ratio: Some(0.625),
                completion_ratio: Some(8.0),
            },
        );
        service.save(config).await.unwrap();
    }

    #[tokio::test]
    async fn delete_routes_to_the_owning_store() {
        let mut store = MockRatioStore::new();
        store
            .expect_list_segmented()
            .returning(|| Ok(segmented_records()));
        store.expect_list_options().returning(|| Ok(options()));
        store
            .expect_put_option()
            .withf(|item| !item.value.contains("mj_imagine"))
            .times(3)
            .returning(|_| Ok(()));

        let service = RatioService::new(Arc::new(store));
        assert_eq!(
            service.delete("mj_imagine").await.unwrap(),
            RatioModeKind::Fixed
        );
        assert!(matches!(
            service.delete("unknown").await,
            Err(AppError::NotFound(_))
        ));
    }

    /// 读选项表时有延迟的内存存储，用于复现并发写入
    #[derive(Default)]
    struct SlowMemoryStore {
        options: std::sync::Mutex<Vec<OptionItem>>,
    }

    #[async_trait::async_trait]
    impl RatioStore for SlowMemoryStore {
        async fn list_options(&self) -> Result<Vec<OptionItem>, StoreError> {
            let snapshot = self.options.lock().unwrap().clone();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(snapshot)
        }

        async fn put_option(&self, item: &OptionItem) -> Result<(), StoreError> {
            let mut options = self.options.lock().unwrap();
            options.retain(|o| o.key != item.key);
            options.push(item.clone());
            Ok(())
        }

        async fn list_segmented(
            &self,
        ) -> Result<HashMap<String, SegmentedRatioRecord>, StoreError> {
            Ok(HashMap::new())
        }

        async fn upsert_segmented(&self, _record: &SegmentedRatioRecord) -> Result<(), StoreError> {
            Ok(())
        }

        async fn delete_segmented(&self, _model_name: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn fixed_ratio(model_name: &str, ratio: f64) -> RatioConfig {
        RatioConfig::fixed(
            model_name,
            FixedRatio {
                model_ratio: Some(ratio),
                ..FixedRatio::default()
            },
        )
    }

    #[tokio::test]
    async fn concurrent_saves_keep_both_models() {
        let service = RatioService::new(Arc::new(SlowMemoryStore::default()));

        let (a, b) = tokio::join!(
            service.save(fixed_ratio("model-a", 1.0)),
            service.save(fixed_ratio("model-b", 2.0))
        );
        a.unwrap();
        b.unwrap();

        let names: Vec<String> = service
            .list()
            .await
            .into_iter()
            .map(|c| c.model_name)
            .collect();
        assert_eq!(names, vec!["model-a", "model-b"]);
    }

    #[tokio::test]
    async fn disabled_fixed_config_is_not_saved() {
        let service = RatioService::new(Arc::new(MockRatioStore::new()));
        let result = service.save(fixed_ratio("model-a", 1.0).with_enabled(false)).await;
        assert!(matches!(
            result,
            Err(AppError::Pricing(PricingError::MalformedConfig(_)))
        ));
    }

    #[tokio::test]
    async fn completion_only_entry_cannot_be_deleted() {
        let mut store = MockRatioStore::new();
        store
            .expect_list_segmented()
            .returning(|| Ok(HashMap::new()));
        store.expect_list_options().returning(|| {
            Ok(vec![OptionItem::new(COMPLETION_RATIO_KEY, r#"{"orphan": 2}"#)])
        });

        let service = RatioService::new(Arc::new(store));
        assert!(matches!(
            service.delete("orphan").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_cache() {
        let mut store = MockRatioStore::new();
        let mut calls = 0;
        store.expect_list_segmented().returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(segmented_records())
            } else {
                Err(StoreError::Rejected("upstream down".to_string()))
            }
        });
        store.expect_list_options().returning(|| Ok(options()));

        let service = RatioService::new(Arc::new(store));
        service.refresh().await.unwrap();
        assert!(service.refresh().await.is_err());
        assert_eq!(service.list().await.len(), 4);
    }
}
