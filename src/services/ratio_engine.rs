//! 倍率与价格换算、分段规则匹配
//!
//! 倍率是唯一的事实来源，美元/人民币价格都是按需推导出来的视图。
//! 后端约定 1 倍率 = $0.002 / 1K tokens = $2 / 1M tokens。

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::PricingError;
use crate::models::{RatioConfig, RatioMode, SegmentRule};

/// 1 USD = 7.3 CNY
pub const USD_TO_CNY_RATE: f64 = 7.3;
/// 每 1 倍率对应的美元价格（每百万token）
pub const USD_PER_MILLION_PER_RATIO: f64 = 2.0;

pub fn ratio_from_usd_price(price_per_million: f64) -> f64 {
    price_per_million / USD_PER_MILLION_PER_RATIO
}

pub fn usd_price_from_ratio(ratio: f64) -> f64 {
    ratio * USD_PER_MILLION_PER_RATIO
}

/// 先换算成美元，再计算倍率
pub fn ratio_from_cny_price(price_per_million: f64) -> f64 {
    ratio_from_usd_price(price_per_million / USD_TO_CNY_RATE)
}

pub fn cny_price_from_ratio(ratio: f64) -> f64 {
    usd_price_from_ratio(ratio) * USD_TO_CNY_RATE
}

/// 由输入、输出价格计算补全倍率，两个价格需使用同一币种
pub fn completion_ratio_from_prices(input_price: f64, output_price: f64) -> Result<f64, PricingError> {
    if input_price == 0.0 {
        return Err(PricingError::InvalidArgument("输入价格不能为0".to_string()));
    }
    Ok(output_price / input_price)
}

/// 选出同时覆盖输入、输出token数且优先级最高的规则
///
/// 优先级相同时取序列中靠前的一条。
pub fn match_segment_rule(
    rules: &[SegmentRule],
    input_tokens: u64,
    output_tokens: u64,
) -> Option<&SegmentRule> {
    let mut best: Option<&SegmentRule> = None;
    for rule in rules.iter().filter(|r| r.matches(input_tokens, output_tokens)) {
        match best {
            Some(current) if current.priority >= rule.priority => {}
            _ => best = Some(rule),
        }
    }
    best
}

/// 可读的token区间描述，仅用于展示
pub fn format_token_range(min: Option<u64>, max: Option<u64>) -> String {
    match (min, max) {
        (None, None) => "unbounded".to_string(),
        (None, Some(max)) => format!("≤ {}", format_token_count(max)),
        (Some(min), None) => format!("> {}", format_token_count(min)),
        (Some(min), Some(max)) => format!(
            "{} < x ≤ {}",
            format_token_count(min),
            format_token_count(max)
        ),
    }
}

fn format_token_count(count: u64) -> String {
    if count >= 1000 {
        format!("{}K", (count as f64 / 1000.0).round() as u64)
    } else {
        count.to_string()
    }
}

/// 实际生效的计费参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectiveRatio {
    /// 按次计费，忽略token数
    FixedPrice { fixed_price: f64 },
    /// 按倍率计费，缺省值由调用方使用系统默认倍率
    Ratio {
        model_ratio: Option<f64>,
        completion_ratio: Option<f64>,
    },
}

pub fn resolve_effective_ratio(
    config: &RatioConfig,
    input_tokens: u64,
    output_tokens: u64,
) -> Result<EffectiveRatio, PricingError> {
    match &config.mode {
        RatioMode::Fixed(fixed) => Ok(match fixed.fixed_price {
            Some(fixed_price) => EffectiveRatio::FixedPrice { fixed_price },
            None => EffectiveRatio::Ratio {
                model_ratio: fixed.model_ratio,
                completion_ratio: fixed.completion_ratio,
            },
        }),
        RatioMode::Segmented(rules) => match_segment_rule(rules, input_tokens, output_tokens)
            .map(|rule| EffectiveRatio::Ratio {
                model_ratio: Some(rule.model_ratio),
                completion_ratio: Some(rule.completion_ratio),
            })
            .ok_or(PricingError::NoMatchingRule {
                input_tokens,
                output_tokens,
            }),
    }
}

/// 单条规则的摘要
pub fn describe_rule(rule: &SegmentRule) -> String {
    format!(
        "input: {} | output: {} | model_ratio: {} | completion_ratio: {}",
        format_token_range(rule.input_min, rule.input_max),
        format_token_range(rule.output_min, rule.output_max),
        rule.model_ratio,
        rule.completion_ratio
    )
}

/// 配置摘要，分段模式下每条规则一行
pub fn describe_config(config: &RatioConfig) -> Vec<String> {
    match &config.mode {
        RatioMode::Fixed(fixed) => {
            if let Some(price) = fixed.fixed_price {
                return vec![format!("fixed price: ${}", price)];
            }
            let show = |value: Option<f64>| {
                value.map_or_else(|| "default".to_string(), |v| v.to_string())
            };
            vec![format!(
                "model_ratio: {} | completion_ratio: {}",
                show(fixed.model_ratio),
                show(fixed.completion_ratio)
            )]
        }
        RatioMode::Segmented(rules) => rules.iter().map(describe_rule).collect(),
    }
}

/// 由倍率推导出的价格视图（每百万token），保留6位小数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PriceView {
    pub model_ratio: f64,
    pub completion_ratio: Option<f64>,
    pub input_price_usd: f64,
    pub input_price_cny: f64,
    pub output_price_usd: Option<f64>,
    pub output_price_cny: Option<f64>,
}

impl PriceView {
    pub fn from_ratios(model_ratio: f64, completion_ratio: Option<f64>) -> Self {
        let input_price_usd = usd_price_from_ratio(model_ratio);
        let input_price_cny = cny_price_from_ratio(model_ratio);
        Self {
            model_ratio,
            completion_ratio,
            input_price_usd: round_price(input_price_usd),
            input_price_cny: round_price(input_price_cny),
            output_price_usd: completion_ratio.map(|c| round_price(input_price_usd * c)),
            output_price_cny: completion_ratio.map(|c| round_price(input_price_cny * c)),
        }
    }

    /// 固定倍率且设置了模型倍率时才有价格视图
    pub fn for_config(config: &RatioConfig) -> Option<Self> {
        match &config.mode {
            RatioMode::Fixed(fixed) if fixed.fixed_price.is_none() => fixed
                .model_ratio
                .map(|ratio| Self::from_ratios(ratio, fixed.completion_ratio)),
            _ => None,
        }
    }
}

fn round_price(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

/// 编辑器提交的价格输入，可用倍率、美元或人民币表示
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum PriceInput {
    Ratio {
        model_ratio: f64,
        completion_ratio: Option<f64>,
    },
    Usd {
        input_price: f64,
        output_price: Option<f64>,
    },
    Cny {
        input_price: f64,
        output_price: Option<f64>,
    },
}

impl PriceInput {
    /// 统一换算成 `(模型倍率, 补全倍率)`
    pub fn normalize(&self) -> Result<(f64, Option<f64>), PricingError> {
        match *self {
            PriceInput::Ratio {
                model_ratio,
                completion_ratio,
            } => {
                check_non_negative("model_ratio", model_ratio)?;
                if let Some(c) = completion_ratio {
                    check_non_negative("completion_ratio", c)?;
                }
                Ok((model_ratio, completion_ratio))
            }
            PriceInput::Usd {
                input_price,
                output_price,
            } => {
                check_prices(input_price, output_price)?;
                let completion = output_price
                    .map(|output| completion_ratio_from_prices(input_price, output))
                    .transpose()?;
                Ok((ratio_from_usd_price(input_price), completion))
            }
            PriceInput::Cny {
                input_price,
                output_price,
            } => {
                check_prices(input_price, output_price)?;
                let completion = output_price
                    .map(|output| {
                        completion_ratio_from_prices(
                            input_price / USD_TO_CNY_RATE,
                            output / USD_TO_CNY_RATE,
                        )
                    })
                    .transpose()?;
                Ok((ratio_from_cny_price(input_price), completion))
            }
        }
    }

    pub fn to_price_view(&self) -> Result<PriceView, PricingError> {
        let (model_ratio, completion_ratio) = self.normalize()?;
        Ok(PriceView::from_ratios(model_ratio, completion_ratio))
    }
}

fn check_prices(input_price: f64, output_price: Option<f64>) -> Result<(), PricingError> {
    check_non_negative("input_price", input_price)?;
    if let Some(output) = output_price {
        check_non_negative("output_price", output)?;
    }
    Ok(())
}

fn check_non_negative(field: &str, value: f64) -> Result<(), PricingError> {
    if !value.is_finite() || value < 0.0 {
        return Err(PricingError::InvalidArgument(format!(
            "{} 必须为非负数: {}",
            field, value
        )));
    }
    Ok(())
}
