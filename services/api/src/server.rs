use crate::cli::ServeArgs;
use crate::infra::{AppState, LifecycleRuntime};
use crate::routes::with_lifecycle_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use stagebloom::config::AppConfig;
use stagebloom::error::AppError;
use stagebloom::telemetry;
use stagebloom::workflows::bootstrap::{BootstrapPlan, Bootstrapper};
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

    let runtime = LifecycleRuntime::new(config.lifecycle.clone());
    if args.seed.is_some() || args.offers.is_some() {
        let plan = BootstrapPlan::load(args.seed.as_deref(), args.offers.as_deref())?;
        let report = Bootstrapper::apply(runtime.engine.as_ref(), &plan)?;
        info!(
            companies = report.companies_created + report.companies_updated,
            staff = report.staff_created + report.staff_updated,
            offers = report.offers_created + report.offers_updated,
            candidates = report.candidates_registered,
            "reference data loaded"
        );
    }
    let (engine, _dispatcher) = runtime.spawn_dispatcher();

    let app = with_lifecycle_routes(engine)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "stagebloom lifecycle service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
