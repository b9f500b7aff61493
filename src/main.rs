use std::env;
use std::sync::Arc;

use billing_engine::api::{AppState, create_router};
use billing_engine::config::ConfigLoader;
use billing_engine::engine::BillingEngine;
use billing_engine::sources::{FileExportSink, ManualActivitySource};
use billing_engine::store::InMemoryStore;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("billing_engine=debug,tower_http=info")),
        )
        .init();

    let config_dir = env::var("BILLING_CONFIG_DIR").unwrap_or_else(|_| "./config/billing".to_string());
    let config = ConfigLoader::load(&config_dir).expect("Failed to load engine configuration");
    let addr = config.server().addr();
    info!(
        engine = %config.engine().name,
        version = %config.engine().version,
        config_dir = %config_dir,
        "Configuration loaded"
    );

    let manual = Arc::new(ManualActivitySource::new("manual"));
    let sink = Arc::new(FileExportSink::new(config.export_output_dir()));
    let engine = BillingEngine::builder(config)
        .store(Arc::new(InMemoryStore::new()))
        .source(manual.clone())
        .sink(sink)
        .build();

    let app = create_router(AppState::new(engine, manual)).layer(TraceLayer::new_for_http());

    info!("Billing engine listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app).await.expect("Server failed");
}
