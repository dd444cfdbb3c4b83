use crate::cli::ServeArgs;
use crate::infra::{build_distribution, AppState};
use crate::routes::with_distribution_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use cv_distribution::config::AppConfig;
use cv_distribution::error::AppError;
use cv_distribution::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let stack = build_distribution(&config.distribution, Vec::new())?;
    let defaults = stack.service.config();
    info!(
        strategy = %defaults.default_strategy,
        batch_size = defaults.batch_size,
        source = %defaults.default_source,
        weighted_capacity = ?defaults.weighted_capacity,
        "distribution defaults loaded"
    );

    let app = with_distribution_routes(stack.service, stack.store)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "cv distribution service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
