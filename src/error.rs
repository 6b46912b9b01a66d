use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ApiResponse;

/// 倍率计算与配置校验错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PricingError {
    /// 参数无效（例如输入价格为0时无法计算补全倍率）
    #[error("参数无效: {0}")]
    InvalidArgument(String),
    /// 分段规则全部不匹配
    #[error("未找到匹配的分段规则: 输入token={input_tokens}, 输出token={output_tokens}")]
    NoMatchingRule { input_tokens: u64, output_tokens: u64 },
    /// 配置格式错误（混合模式字段、缺少必填字段等）
    #[error("配置格式错误: {0}")]
    MalformedConfig(String),
}

/// 上游选项存储访问错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("请求上游失败: {0}")]
    Http(#[from] reqwest::Error),
    #[error("上游拒绝请求: {0}")]
    Rejected(String),
    #[error("上游地址无效: {0}")]
    InvalidBaseUrl(String),
    #[error("解析上游数据失败: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Pricing(#[from] PricingError),
}

/// 接口层错误，统一转换为 `{success: false, message, data: null}`
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("未找到模型 '{0}' 的倍率配置")]
    NotFound(String),
    #[error("模型 '{0}' 的倍率配置未启用")]
    Disabled(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Pricing(PricingError::InvalidArgument(_))
            | Self::Pricing(PricingError::MalformedConfig(_)) => StatusCode::BAD_REQUEST,
            Self::Pricing(PricingError::NoMatchingRule { .. }) => StatusCode::NOT_FOUND,
            // 保存前的本地校验失败属于请求错误，而非上游故障
            Self::Store(StoreError::Pricing(_)) => StatusCode::BAD_REQUEST,
            Self::Store(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Disabled(_) => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("请求处理失败: {}", self);
        } else {
            tracing::warn!("请求处理失败: {}", self);
        }

        (status, Json(ApiResponse::<()>::failure(self.to_string()))).into_response()
    }
}
