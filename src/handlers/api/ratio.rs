use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::error::{AppError, PricingError};
use crate::models::{ApiResponse, RatioConfig, RatioConfigDraft, RatioModeKind, SegmentRule};
use crate::routes::api::AppState;
use crate::services::ratio_engine::{
    describe_config, describe_rule, match_segment_rule, EffectiveRatio, PriceInput, PriceView,
};
use crate::services::RatioCacheStatus;

type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

/// 规则匹配预览请求
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MatchRuleRequest {
    /// 待匹配的规则列表
    pub rules: Vec<SegmentRule>,
    /// 输入token数
    pub input_tokens: u64,
    /// 输出token数
    pub output_tokens: u64,
}

/// 规则匹配预览结果
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MatchRuleResponse {
    /// 命中规则在请求列表中的下标
    pub index: usize,
    pub rule: SegmentRule,
    /// 规则摘要
    pub summary: String,
}

/// 计费参数解析请求
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResolveRequest {
    /// 模型名称
    pub model_name: String,
    /// 输入token数
    pub input_tokens: u64,
    /// 输出token数
    pub output_tokens: u64,
}

/// 配置列表查询参数
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListConfigsQuery {
    /// 按模型名称模糊搜索，不区分大小写
    pub search: Option<String>,
}

/// 单个模型配置详情
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RatioConfigDetail {
    #[schema(value_type = RatioConfigDraft)]
    pub config: RatioConfig,
    /// 可读摘要
    pub summary: Vec<String>,
    /// 固定倍率对应的价格
    pub price: Option<PriceView>,
}

impl RatioConfigDetail {
    fn from_config(config: RatioConfig) -> Self {
        Self {
            summary: describe_config(&config),
            price: PriceView::for_config(&config),
            config,
        }
    }
}

/// 将价格或倍率换算为完整的价格视图
#[utoipa::path(
    post,
    path = "/v1/ratio/convert",
    request_body = PriceInput,
    responses(
        (status = 200, description = "换算成功，data 为价格视图", body = PriceView),
        (status = 400, description = "参数无效"),
    ),
    tag = "ratio"
)]
pub async fn convert_price(Json(input): Json<PriceInput>) -> ApiResult<PriceView> {
    let view = input.to_price_view()?;
    Ok(Json(ApiResponse::ok(view)))
}

/// 预览一组规则对给定token数的匹配结果
#[utoipa::path(
    post,
    path = "/v1/ratio/match",
    request_body = MatchRuleRequest,
    responses(
        (status = 200, description = "命中规则", body = MatchRuleResponse),
        (status = 404, description = "没有匹配的规则"),
    ),
    tag = "ratio"
)]
pub async fn match_rule(Json(request): Json<MatchRuleRequest>) -> ApiResult<MatchRuleResponse> {
    let rule = match_segment_rule(&request.rules, request.input_tokens, request.output_tokens)
        .ok_or(PricingError::NoMatchingRule {
            input_tokens: request.input_tokens,
            output_tokens: request.output_tokens,
        })?;
    let index = request
        .rules
        .iter()
        .position(|r| std::ptr::eq(r, rule))
        .unwrap_or_default();

    Ok(Json(ApiResponse::ok(MatchRuleResponse {
        index,
        summary: describe_rule(rule),
        rule: rule.clone(),
    })))
}

/// 解析模型在给定token数下实际生效的计费参数
#[utoipa::path(
    post,
    path = "/v1/ratio/resolve",
    request_body = ResolveRequest,
    responses(
        (status = 200, description = "解析成功", body = EffectiveRatio),
        (status = 404, description = "模型不存在或没有匹配的规则"),
        (status = 409, description = "模型配置未启用"),
    ),
    tag = "ratio"
)]
pub async fn resolve_ratio(
    State(state): State<AppState>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<EffectiveRatio> {
    let effective = state
        .ratio_service
        .resolve(&request.model_name, request.input_tokens, request.output_tokens)
        .await?;
    Ok(Json(ApiResponse::ok(effective)))
}

/// 获取所有模型的倍率配置
#[utoipa::path(
    get,
    path = "/v1/ratio/configs",
    params(ListConfigsQuery),
    responses(
        (status = 200, description = "成功获取倍率配置", body = [RatioConfigDraft]),
    ),
    tag = "ratio"
)]
pub async fn list_configs(
    State(state): State<AppState>,
    Query(query): Query<ListConfigsQuery>,
) -> ApiResult<Vec<RatioConfig>> {
    let mut configs = state.ratio_service.list().await;
    if let Some(keyword) = query.search.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        let keyword = keyword.to_lowercase();
        configs.retain(|c| c.model_name.to_lowercase().contains(&keyword));
    }
    Ok(Json(ApiResponse::ok(configs)))
}

/// 获取单个模型的倍率配置
#[utoipa::path(
    get,
    path = "/v1/ratio/configs/{model_name}",
    params(
        ("model_name" = String, Path, description = "模型名称"),
    ),
    responses(
        (status = 200, description = "成功获取倍率配置", body = RatioConfigDetail),
        (status = 404, description = "模型配置不存在"),
    ),
    tag = "ratio"
)]
pub async fn get_config(
    State(state): State<AppState>,
    Path(model_name): Path<String>,
) -> ApiResult<RatioConfigDetail> {
    let config = state
        .ratio_service
        .get(&model_name)
        .await
        .ok_or(AppError::NotFound(model_name))?;
    Ok(Json(ApiResponse::ok(RatioConfigDetail::from_config(config))))
}

/// 创建或更新倍率配置
#[utoipa::path(
    post,
    path = "/v1/ratio/configs",
    request_body = RatioConfigDraft,
    responses(
        (status = 200, description = "保存成功", body = RatioConfigDraft),
        (status = 400, description = "配置无效"),
        (status = 502, description = "上游存储失败"),
    ),
    tag = "ratio"
)]
pub async fn save_config(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> ApiResult<RatioConfig> {
    let config: RatioConfig = serde_json::from_value(payload)
        .map_err(|e| PricingError::MalformedConfig(e.to_string()))?;
    info!(
        "收到倍率配置保存请求: model={}, mode={:?}",
        config.model_name,
        config.kind()
    );

    let saved = state.ratio_service.save(config).await?;
    Ok(Json(ApiResponse::ok_with_message(saved, "保存成功")))
}

/// 删除倍率配置
#[utoipa::path(
    delete,
    path = "/v1/ratio/configs/{model_name}",
    params(
        ("model_name" = String, Path, description = "模型名称"),
    ),
    responses(
        (status = 200, description = "删除成功，data 为被删除配置的模式", body = RatioModeKind),
        (status = 404, description = "模型配置不存在"),
    ),
    tag = "ratio"
)]
pub async fn delete_config(
    State(state): State<AppState>,
    Path(model_name): Path<String>,
) -> ApiResult<RatioModeKind> {
    let kind = state.ratio_service.delete(&model_name).await?;
    Ok(Json(ApiResponse::ok_with_message(kind, "倍率配置已删除")))
}

/// 立即从上游刷新缓存
#[utoipa::path(
    post,
    path = "/v1/ratio/refresh",
    responses(
        (status = 200, description = "刷新成功", body = RatioCacheStatus),
        (status = 502, description = "上游存储失败"),
    ),
    tag = "ratio"
)]
pub async fn refresh_configs(State(state): State<AppState>) -> ApiResult<RatioCacheStatus> {
    state.ratio_service.refresh().await?;
    Ok(Json(ApiResponse::ok(state.ratio_service.status().await)))
}

/// 缓存状态
#[utoipa::path(
    get,
    path = "/v1/ratio/status",
    responses(
        (status = 200, description = "缓存状态", body = RatioCacheStatus),
    ),
    tag = "ratio"
)]
pub async fn cache_status(State(state): State<AppState>) -> ApiResult<RatioCacheStatus> {
    Ok(Json(ApiResponse::ok(state.ratio_service.status().await)))
}

/// 健康检查
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
