use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::PricingError;
use crate::models::ratio_config::{RatioConfig, RatioMode};
use crate::models::segment_rule::SegmentRule;

/// 按次计费价格表的选项键
pub const MODEL_PRICE_KEY: &str = "ModelPrice";
/// 模型倍率表的选项键
pub const MODEL_RATIO_KEY: &str = "ModelRatio";
/// 补全倍率表的选项键
pub const COMPLETION_RATIO_KEY: &str = "CompletionRatio";

/// 统一响应格式 `{success, message, data}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// 操作状态
    pub success: bool,
    /// 消息
    #[serde(default)]
    pub message: String,
    /// 数据
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: String::new(),
            data: Some(data),
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

/// 系统选项，`value` 为JSON字符串
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OptionItem {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl OptionItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// 分段倍率存储中的单条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SegmentedRatioRecord {
    pub model_name: String,
    #[serde(default)]
    pub rules: Vec<SegmentRule>,
    #[serde(default)]
    pub enabled: bool,
}

impl SegmentedRatioRecord {
    /// 固定模式的配置没有对应记录
    pub fn from_config(config: &RatioConfig) -> Option<Self> {
        match &config.mode {
            RatioMode::Segmented(rules) => Some(Self {
                model_name: config.model_name.clone(),
                rules: rules.clone(),
                enabled: config.enabled,
            }),
            RatioMode::Fixed(_) => None,
        }
    }
}

impl TryFrom<SegmentedRatioRecord> for RatioConfig {
    type Error = PricingError;

    fn try_from(record: SegmentedRatioRecord) -> Result<Self, Self::Error> {
        Ok(RatioConfig::segmented(record.model_name, record.rules)?.with_enabled(record.enabled))
    }
}
