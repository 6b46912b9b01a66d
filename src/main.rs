use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use ratio_manager::{
    config::AppConfig,
    routes::api::app_routes,
    services::{HttpRatioStore, RatioService},
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置
    let config = AppConfig::from_env()?;

    // 初始化日志，RUST_LOG 优先于 LOG_LEVEL
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.server.log_level.clone()));
    let registry = tracing_subscriber::registry().with(filter);
    if config.is_production() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("应用启动中...");
    info!("环境: {:?}", config.environment);
    info!("上游地址: {}", config.upstream.base_url);

    let store = Arc::new(HttpRatioStore::new(&config.upstream)?);
    let ratio_service = Arc::new(RatioService::new(store));

    // 上游暂时不可用时仍然启动，等待定期刷新
    match ratio_service.refresh().await {
        Ok(count) => info!("倍率配置加载成功, 共 {} 个模型", count),
        Err(e) => warn!("首次加载倍率配置失败: {}", e),
    }

    // 启动定期刷新任务
    if config.refresh.interval_secs > 0 {
        let service = ratio_service.clone();
        let period = Duration::from_secs(config.refresh.interval_secs);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 第一次 tick 立即返回，启动时已经加载过
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = service.refresh().await {
                    error!("定期刷新倍率配置失败: {}", e);
                }
            }
        });
        info!("已启动倍率配置定期刷新, 间隔 {} 秒", config.refresh.interval_secs);
    }

    // 创建路由
    let app = app_routes(ratio_service, &config.server);

    // 启动服务器
    let addr = config.socket_addr()?;
    info!("Starting server on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr).await?,
        app.into_make_service(),
    )
    .await?;

    Ok(())
}
