use crate::cli::ServeArgs;
use crate::infra::{item_service, media_pipeline, AppState, InMemoryItemRepository};
use crate::routes::with_item_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use listing_hub::config::AppConfig;
use listing_hub::error::AppError;
use listing_hub::telemetry;
use listing_hub::workflows::listings::{CallerIdentity, FieldValidator, SeedImporter};
use std::sync::atomic::{AtomicBool, Ordering};
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

    telemetry::init(&config.telemetry, config.environment)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let (store, ingestor) = media_pipeline(&config.media);
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        media: store,
    };

    let repository = Arc::new(InMemoryItemRepository::default());
    let lifecycle = item_service(repository, ingestor, FieldValidator::for_today());

    if let (Some(path), Some(operator)) = (args.seed_csv.take(), args.seed_operator.take()) {
        let importer = SeedImporter::new(lifecycle.clone(), CallerIdentity::moderator(operator));
        let summary = importer.import_path(&path)?;
        info!(
            path = %path.display(),
            imported = summary.imported.len(),
            skipped_columns = ?summary.skipped_columns,
            "seeded catalog"
        );
    }

    let app = with_item_routes(lifecycle)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        media_root = %config.media.root.display(),
        "listing hub ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
