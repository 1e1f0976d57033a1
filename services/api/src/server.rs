use crate::cli::ServeArgs;
use crate::demo::{demo_fixture, DEMO_TENANT};
use crate::infra::{AppState, InMemoryCalculationRepository};
use crate::routes::with_calculation_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use comp_engine::compensation::{CalculationService, TenantId};
use comp_engine::config::AppConfig;
use comp_engine::error::AppError;
use comp_engine::telemetry;
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

    let repository = Arc::new(InMemoryCalculationRepository::default());
    repository.load_tenant(TenantId(DEMO_TENANT.to_string()), demo_fixture()?);
    let calculation_service = Arc::new(CalculationService::new(repository, config.engine.clone()));

    let app = with_calculation_routes(calculation_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        max_concurrency = config.engine.max_concurrency,
        "compensation engine ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
