use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::error::PricingError;
use crate::models::segment_rule::SegmentRule;

/// 计费模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RatioModeKind {
    Fixed,
    Segmented,
}

/// 固定计费参数
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FixedRatio {
    /// 按次计费价格（美元/次），设置后忽略倍率
    pub fixed_price: Option<f64>,
    /// 模型倍率，未设置时由系统默认值决定
    pub model_ratio: Option<f64>,
    /// 补全倍率，未设置时由系统默认值决定
    pub completion_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RatioMode {
    Fixed(FixedRatio),
    Segmented(Vec<SegmentRule>),
}

/// 单个模型的倍率配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RatioConfigDraft", into = "RatioConfigDraft")]
pub struct RatioConfig {
    pub model_name: String,
    pub enabled: bool,
    pub mode: RatioMode,
}

impl RatioConfig {
    pub fn fixed(model_name: impl Into<String>, fixed: FixedRatio) -> Self {
        Self {
            model_name: model_name.into(),
            enabled: true,
            mode: RatioMode::Fixed(fixed),
        }
    }

    /// 创建分段倍率配置，至少需要一条规则
    pub fn segmented(
        model_name: impl Into<String>,
        rules: Vec<SegmentRule>,
    ) -> Result<Self, PricingError> {
        if rules.is_empty() {
            return Err(PricingError::MalformedConfig(
                "分段倍率模式至少需要一条规则".to_string(),
            ));
        }
        Ok(Self {
            model_name: model_name.into(),
            enabled: true,
            mode: RatioMode::Segmented(rules),
        })
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn kind(&self) -> RatioModeKind {
        match self.mode {
            RatioMode::Fixed(_) => RatioModeKind::Fixed,
            RatioMode::Segmented(_) => RatioModeKind::Segmented,
        }
    }

    /// 分段规则，固定模式下为空
    pub fn rules(&self) -> &[SegmentRule] {
        match &self.mode {
            RatioMode::Fixed(_) => &[],
            RatioMode::Segmented(rules) => rules,
        }
    }

    /// 保存前的完整校验
    pub fn validate(&self) -> Result<(), PricingError> {
        if self.model_name.trim().is_empty() {
            return Err(PricingError::MalformedConfig("模型名称不能为空".to_string()));
        }

        match &self.mode {
            RatioMode::Fixed(fixed) => {
                if !self.enabled {
                    return Err(PricingError::MalformedConfig(
                        "固定倍率模式不支持停用，请删除配置".to_string(),
                    ));
                }
                if fixed.fixed_price.is_none() && fixed.model_ratio.is_none() {
                    return Err(PricingError::MalformedConfig(
                        "请至少设置固定价格或模型倍率".to_string(),
                    ));
                }
                for (field, value) in [
                    ("fixed_price", fixed.fixed_price),
                    ("model_ratio", fixed.model_ratio),
                    ("completion_ratio", fixed.completion_ratio),
                ] {
                    if let Some(value) = value {
                        if !value.is_finite() || value < 0.0 {
                            return Err(PricingError::MalformedConfig(format!(
                                "{} 必须为非负数: {}",
                                field, value
                            )));
                        }
                    }
                }
            }
            RatioMode::Segmented(rules) => {
                if rules.is_empty() {
                    return Err(PricingError::MalformedConfig(
                        "分段倍率模式至少需要一条规则".to_string(),
                    ));
                }
                for (index, rule) in rules.iter().enumerate() {
                    rule.validate().map_err(|e| {
                        PricingError::MalformedConfig(format!("规则 {} 无效: {}", index + 1, e))
                    })?;
                }
            }
        }

        Ok(())
    }
}

/// 倍率配置的传输格式，`mode` 显式标明计费模式
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RatioConfigDraft {
    /// 模型名称
    pub model_name: String,
    /// 是否启用，默认启用
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 计费模式（fixed/segmented）
    pub mode: RatioModeKind,
    /// 按次计费价格（仅固定模式）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_price: Option<f64>,
    /// 模型倍率（仅固定模式）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_ratio: Option<f64>,
    /// 补全倍率（仅固定模式）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_ratio: Option<f64>,
    /// 分段规则（仅分段模式）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<SegmentRule>,
}

fn default_enabled() -> bool {
    true
}

impl TryFrom<RatioConfigDraft> for RatioConfig {
    type Error = PricingError;

    fn try_from(draft: RatioConfigDraft) -> Result<Self, Self::Error> {
        let mode = match draft.mode {
            RatioModeKind::Fixed => {
                if !draft.rules.is_empty() {
                    return Err(PricingError::MalformedConfig(format!(
                        "模型 '{}' 为固定倍率模式，不能包含分段规则",
                        draft.model_name
                    )));
                }
                RatioMode::Fixed(FixedRatio {
                    fixed_price: draft.fixed_price,
                    model_ratio: draft.model_ratio,
                    completion_ratio: draft.completion_ratio,
                })
            }
            RatioModeKind::Segmented => {
                if draft.fixed_price.is_some()
                    || draft.model_ratio.is_some()
                    || draft.completion_ratio.is_some()
                {
                    return Err(PricingError::MalformedConfig(format!(
                        "模型 '{}' 为分段倍率模式，不能包含固定价格或固定倍率",
                        draft.model_name
                    )));
                }
                if draft.rules.is_empty() {
                    return Err(PricingError::MalformedConfig(format!(
                        "模型 '{}' 为分段倍率模式，至少需要一条规则",
                        draft.model_name
                    )));
                }
                RatioMode::Segmented(draft.rules)
            }
        };

        Ok(Self {
            model_name: draft.model_name,
            enabled: draft.enabled,
            mode,
        })
    }
}

impl From<RatioConfig> for RatioConfigDraft {
    fn from(config: RatioConfig) -> Self {
        let mut draft = RatioConfigDraft {
            model_name: config.model_name,
            enabled: config.enabled,
            mode: RatioModeKind::Fixed,
            fixed_price: None,
            model_ratio: None,
            completion_ratio: None,
            rules: Vec::new(),
        };
        match config.mode {
            RatioMode::Fixed(fixed) => {
                draft.fixed_price = fixed.fixed_price;
                draft.model_ratio = fixed.model_ratio;
                draft.completion_ratio = fixed.completion_ratio;
            }
            RatioMode::Segmented(rules) => {
                draft.mode = RatioModeKind::Segmented;
                draft.rules = rules;
            }
        }
        draft
    }
}
