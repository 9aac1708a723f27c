use crate::cli::ServeArgs;
use crate::infra::{
    AppState, InMemoryChainStore, InMemoryLinkStore, InMemoryStatusStore, LogBackup, LogNotifier,
    OpenDirectory, ScriptableAuditBridge, ScriptableScanBridge,
};
use crate::routes::with_approval_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use shareguard::config::AppConfig;
use shareguard::error::AppError;
use shareguard::telemetry;
use shareguard::workflows::sharelink::approval::{ApprovalOrchestrator, StandardPolicy};
use tracing::{info, warn};

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

    let policy = Arc::new(StandardPolicy::from_settings(&config.approval));
    let orchestrator = Arc::new(ApprovalOrchestrator::new(
        Arc::new(InMemoryChainStore::default()),
        Arc::new(InMemoryStatusStore::default()),
        Arc::new(InMemoryLinkStore::default()),
        Arc::new(OpenDirectory),
        Arc::new(ScriptableScanBridge::default()),
        Arc::new(ScriptableAuditBridge::default()),
        Arc::new(LogNotifier),
        Arc::new(LogBackup),
        policy,
        config.approval.clone(),
    ));

    // The scan and audit results arrive out of band; both poll loops feed
    // them back into the orchestrator on a fixed cadence.
    let poll_interval = config.approval.poll_interval;
    let poller = orchestrator.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = poller.poll_scan_results() {
                warn!(%err, "scan poll cycle failed");
            }
            if let Err(err) = poller.poll_audit_results() {
                warn!(%err, "audit poll cycle failed");
            }
            if let Err(err) = poller.retry_pending_backups() {
                warn!(%err, "backup sweep failed");
            }
        }
    });

    let app = with_approval_routes(orchestrator)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "share-link approval service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
