// 导出所有模型组件

pub mod ratio_config;
pub mod segment_rule;
pub mod store;

// 重新导出核心类型
pub use ratio_config::{FixedRatio, RatioConfig, RatioConfigDraft, RatioMode, RatioModeKind};
pub use segment_rule::SegmentRule;
pub use store::{
    ApiResponse, OptionItem, SegmentedRatioRecord, COMPLETION_RATIO_KEY, MODEL_PRICE_KEY,
    MODEL_RATIO_KEY,
};
