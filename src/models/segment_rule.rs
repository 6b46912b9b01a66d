use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

/// 分段计费规则
///
/// 上下界使用 `Option<u64>` 表示，`None` 即该侧无限制。上游存储仍以 `0` 表示
/// 无限制，序列化时在边界上做转换。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
#[validate(schema(function = "validate_rule_bounds"))]
pub struct SegmentRule {
    /// 输入token下限，0表示无限制
    #[serde(default, with = "token_bound")]
    #[schema(value_type = u64)]
    pub input_min: Option<u64>,
    /// 输入token上限，0表示无限制
    #[serde(default, with = "token_bound")]
    #[schema(value_type = u64)]
    pub input_max: Option<u64>,
    /// 下限是否为开区间（>），默认是
    #[serde(default = "default_min_exclusive")]
    pub input_min_exclusive: bool,
    /// 上限是否为开区间（<），默认否（≤）
    #[serde(default)]
    pub input_max_exclusive: bool,

    /// 输出token下限，0表示无限制
    #[serde(default, with = "token_bound")]
    #[schema(value_type = u64)]
    pub output_min: Option<u64>,
    /// 输出token上限，0表示无限制
    #[serde(default, with = "token_bound")]
    #[schema(value_type = u64)]
    pub output_max: Option<u64>,
    #[serde(default = "default_min_exclusive")]
    pub output_min_exclusive: bool,
    #[serde(default)]
    pub output_max_exclusive: bool,

    /// 模型（输入）倍率
    #[validate(range(min = 0.0, message = "模型倍率不能为负数"))]
    pub model_ratio: f64,
    /// 补全（输出）倍率
    #[validate(range(min = 0.0, message = "补全倍率不能为负数"))]
    pub completion_ratio: f64,

    /// 优先级，数值越大越先匹配
    #[serde(default)]
    pub priority: i32,
}

fn default_min_exclusive() -> bool {
    true
}

fn validate_rule_bounds(rule: &SegmentRule) -> Result<(), ValidationError> {
    if let (Some(min), Some(max)) = (rule.input_min, rule.input_max) {
        if min > max {
            let mut err = ValidationError::new("input_range");
            err.message = Some("输入token最小值不能大于最大值".into());
            return Err(err);
        }
    }
    if let (Some(min), Some(max)) = (rule.output_min, rule.output_max) {
        if min > max {
            let mut err = ValidationError::new("output_range");
            err.message = Some("输出token最小值不能大于最大值".into());
            return Err(err);
        }
    }
    Ok(())
}

impl SegmentRule {
    /// 创建一条不限token范围的规则
    pub fn new(model_ratio: f64, completion_ratio: f64) -> Self {
        Self {
            input_min: None,
            input_max: None,
            input_min_exclusive: true,
            input_max_exclusive: false,
            output_min: None,
            output_max: None,
            output_min_exclusive: true,
            output_max_exclusive: false,
            model_ratio,
            completion_ratio,
            priority: 0,
        }
    }

    pub fn with_input_range(mut self, min: Option<u64>, max: Option<u64>) -> Self {
        self.input_min = min;
        self.input_max = max;
        self
    }

    pub fn with_output_range(mut self, min: Option<u64>, max: Option<u64>) -> Self {
        self.output_min = min;
        self.output_max = max;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// 输入、输出token数是否都落在本规则的区间内
    pub fn matches(&self, input_tokens: u64, output_tokens: u64) -> bool {
        within(
            input_tokens,
            self.input_min,
            self.input_min_exclusive,
            self.input_max,
            self.input_max_exclusive,
        ) && within(
            output_tokens,
            self.output_min,
            self.output_min_exclusive,
            self.output_max,
            self.output_max_exclusive,
        )
    }
}

fn within(
    value: u64,
    min: Option<u64>,
    min_exclusive: bool,
    max: Option<u64>,
    max_exclusive: bool,
) -> bool {
    let above_min = match min {
        None => true,
        Some(min) if min_exclusive => value > min,
        Some(min) => value >= min,
    };
    let below_max = match max {
        None => true,
        Some(max) if max_exclusive => value < max,
        Some(max) => value <= max,
    };
    above_min && below_max
}

/// 上游以0表示无限制，内部统一为 `None`
mod token_bound {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bound: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(bound.unwrap_or(0))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.filter(|v| *v != 0))
    }
}
