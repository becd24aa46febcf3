use std::sync::Arc;
use std::time::{Duration, Instant};

use tower_http::compression::CompressionLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use doorman_gateway::config::GatewaySettings;
use doorman_gateway::logging::{BufferLayer, MemoryLogBuffer};
use doorman_gateway::state::AppState;
use doorman_gateway::store::snapshot;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // The ring buffer must exist before the subscriber so startup logs land
    // in the same buffer the logging routes serve.
    let log_buffer = MemoryLogBuffer::new();
    init_tracing(Arc::clone(&log_buffer));

    let settings = GatewaySettings::from_env();
    settings.validate()?;

    let state = AppState::new_with_log_buffer(settings, log_buffer).await?;

    let _sweeper = state.ledger.spawn_sweeper(Duration::from_secs(60));
    if state.store.is_memory() {
        spawn_auto_save(state.clone());
    }

    // Inner to outer: body-size cap, then gzip, with the trace span wrapping
    // both so compressed rejects still land in the request span.
    let app = doorman_gateway::create_router(state.clone())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        );

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], state.settings.port));
    tracing::info!("doorman gateway listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

fn init_tracing(log_buffer: Arc<MemoryLogBuffer>) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(BufferLayer::new(log_buffer));

    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Periodic encrypted dump driven by the security settings document
/// (memory mode only). The frequency can change at runtime; the loop
/// re-reads the settings every minute.
fn spawn_auto_save(state: AppState) {
    tokio::spawn(async move {
        let mut last_save = Instant::now();
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;

            let security = state.security_settings().await;
            if !security.enable_auto_save {
                continue;
            }
            let frequency = Duration::from_secs(security.auto_save_frequency_seconds.max(60));
            if last_save.elapsed() < frequency {
                continue;
            }

            let Some(store) = state.store.memory() else {
                return;
            };
            let dump_path = security
                .dump_path
                .unwrap_or_else(|| state.settings.mem_dump_path.clone());
            match snapshot::dump_to_file(
                store,
                &dump_path,
                state.settings.mem_encryption_key.as_deref(),
            )
            .await
            {
                Ok(path) => {
                    last_save = Instant::now();
                    tracing::debug!("auto-save: wrote {}", path.display());
                }
                Err(e) => tracing::error!("auto-save: dump failed: {}", e),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    tracing::info!("Starting graceful shutdown");
}
