use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use crate::error::PricingError;
use crate::models::{
    FixedRatio, OptionItem, RatioConfig, RatioMode, COMPLETION_RATIO_KEY, MODEL_PRICE_KEY,
    MODEL_RATIO_KEY,
};

/// 系统选项中的三张固定计费表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixedRatioTables {
    pub model_price: BTreeMap<String, f64>,
    pub model_ratio: BTreeMap<String, f64>,
    pub completion_ratio: BTreeMap<String, f64>,
}

impl FixedRatioTables {
    /// 从选项列表中解析三张表，无关的选项会被忽略
    pub fn from_options(items: &[OptionItem]) -> Result<Self, PricingError> {
        let mut tables = Self::default();
        for item in items {
            let target = match item.key.as_str() {
                MODEL_PRICE_KEY => &mut tables.model_price,
                MODEL_RATIO_KEY => &mut tables.model_ratio,
                COMPLETION_RATIO_KEY => &mut tables.completion_ratio,
                _ => continue,
            };
            *target = parse_table(&item.key, &item.value)?;
        }

        debug!(
            "解析固定倍率表: 按次价格 {} 条, 模型倍率 {} 条, 补全倍率 {} 条",
            tables.model_price.len(),
            tables.model_ratio.len(),
            tables.completion_ratio.len()
        );
        Ok(tables)
    }

    /// 为每个出现在价格表或倍率表中的模型生成固定配置，跳过 `skip` 中的模型
    pub fn fixed_configs(&self, skip: &HashSet<&str>) -> Vec<RatioConfig> {
        let names: BTreeSet<&String> = self
            .model_price
            .keys()
            .chain(self.model_ratio.keys())
            .collect();

        names
            .into_iter()
            .filter(|name| !skip.contains(name.as_str()))
            .map(|name| {
                RatioConfig::fixed(
                    name.clone(),
                    FixedRatio {
                        fixed_price: self.model_price.get(name).copied(),
                        model_ratio: self.model_ratio.get(name).copied(),
                        completion_ratio: self.completion_ratio.get(name).copied(),
                    },
                )
            })
            .collect()
    }

    /// 写入一个固定模式配置
    ///
    /// 设置了按次价格时清除该模型的倍率，否则清除按次价格。
    pub fn apply(&mut self, config: &RatioConfig) -> Result<(), PricingError> {
        let fixed = match &config.mode {
            RatioMode::Fixed(fixed) => fixed,
            RatioMode::Segmented(_) => {
                return Err(PricingError::MalformedConfig(format!(
                    "模型 '{}' 不是固定倍率模式",
                    config.model_name
                )))
            }
        };
        let name = config.model_name.clone();

        if let Some(price) = fixed.fixed_price {
            self.model_price.insert(name.clone(), price);
            self.model_ratio.remove(&name);
            self.completion_ratio.remove(&name);
            return Ok(());
        }

        let ratio = fixed.model_ratio.ok_or_else(|| {
            PricingError::MalformedConfig("请至少设置固定价格或模型倍率".to_string())
        })?;
        self.model_price.remove(&name);
        self.model_ratio.insert(name.clone(), ratio);
        match fixed.completion_ratio {
            Some(completion) => {
                self.completion_ratio.insert(name, completion);
            }
            None => {
                self.completion_ratio.remove(&name);
            }
        }
        Ok(())
    }

    /// 从三张表中移除模型，返回是否存在过
    pub fn remove(&mut self, model_name: &str) -> bool {
        let price = self.model_price.remove(model_name).is_some();
        let ratio = self.model_ratio.remove(model_name).is_some();
        let completion = self.completion_ratio.remove(model_name).is_some();
        price || ratio || completion
    }

    /// 是否存在该模型的固定配置，只有补全倍率的条目不算
    pub fn contains(&self, model_name: &str) -> bool {
        self.model_price.contains_key(model_name) || self.model_ratio.contains_key(model_name)
    }

    /// 序列化为待写回的三个选项
    pub fn to_option_items(&self) -> Result<Vec<OptionItem>, PricingError> {
        Ok(vec![
            OptionItem::new(MODEL_PRICE_KEY, render_table(&self.model_price)?),
            OptionItem::new(MODEL_RATIO_KEY, render_table(&self.model_ratio)?),
            OptionItem::new(COMPLETION_RATIO_KEY, render_table(&self.completion_ratio)?),
        ])
    }
}

fn parse_table(key: &str, value: &str) -> Result<BTreeMap<String, f64>, PricingError> {
    if value.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(value)
        .map_err(|e| PricingError::MalformedConfig(format!("解析选项 {} 失败: {}", key, e)))
}

fn render_table(table: &BTreeMap<String, f64>) -> Result<String, PricingError> {
    serde_json::to_string_pretty(table)
        .map_err(|e| PricingError::MalformedConfig(format!("序列化倍率表失败: {}", e)))
}

/// 合并分段配置与固定配置：分段配置在前，同名模型以分段配置为准
pub fn merge_configs(mut segmented: Vec<RatioConfig>, tables: &FixedRatioTables) -> Vec<RatioConfig> {
    segmented.sort_by(|a, b| a.model_name.cmp(&b.model_name));
    let skip: HashSet<&str> = segmented.iter().map(|c| c.model_name.as_str()).collect();
    let fixed = tables.fixed_configs(&skip);
    segmented.extend(fixed);
    segmented
}
