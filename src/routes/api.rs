use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::ServerConfig;
use crate::handlers::api::{
    cache_status, convert_price, delete_config, get_config, health_check, list_configs,
    match_rule, refresh_configs, resolve_ratio, save_config, MatchRuleRequest, MatchRuleResponse,
    RatioConfigDetail, ResolveRequest,
};
use crate::models::{RatioConfigDraft, RatioModeKind, SegmentRule};
use crate::services::{EffectiveRatio, PriceInput, PriceView, RatioCacheStatus, RatioService};

/// API文档
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::api::ratio::convert_price,
        crate::handlers::api::ratio::match_rule,
        crate::handlers::api::ratio::resolve_ratio,
        crate::handlers::api::ratio::list_configs,
        crate::handlers::api::ratio::get_config,
        crate::handlers::api::ratio::save_config,
        crate::handlers::api::ratio::delete_config,
        crate::handlers::api::ratio::refresh_configs,
        crate::handlers::api::ratio::cache_status
    ),
    components(
        schemas(
            PriceInput,
            PriceView,
            EffectiveRatio,
            SegmentRule,
            RatioConfigDraft,
            RatioModeKind,
            RatioConfigDetail,
            RatioCacheStatus,
            MatchRuleRequest,
            MatchRuleResponse,
            ResolveRequest
        )
    ),
    tags(
        (name = "ratio", description = "模型倍率与分段计费")
    )
)]
struct ApiDoc;

// 应用程序状态
#[derive(Clone)]
pub struct AppState {
    pub ratio_service: Arc<RatioService>,
}

// 配置API路由
pub fn app_routes(ratio_service: Arc<RatioService>, server: &ServerConfig) -> Router {
    let state = AppState { ratio_service };

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(health_check))
        .route("/v1/ratio/convert", post(convert_price))
        .route("/v1/ratio/match", post(match_rule))
        .route("/v1/ratio/resolve", post(resolve_ratio))
        .route("/v1/ratio/configs", get(list_configs).post(save_config))
        .route(
            "/v1/ratio/configs/:model_name",
            get(get_config).delete(delete_config),
        )
        .route("/v1/ratio/refresh", post(refresh_configs))
        .route("/v1/ratio/status", get(cache_status))
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(server.request_timeout_secs)))
        .layer(cors_layer(&server.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("忽略无效的CORS域名: {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
