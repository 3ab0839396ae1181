use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use axum::{body::Body, routing::get, Router};
use http::{HeaderValue, StatusCode};
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::{GovernorError, GovernorLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod routes;
mod services;
#[cfg(test)]
mod test_support;

use config::Config;
use services::{
    blobstore::BlobStore,
    init,
    mirror::{MirrorClientFactory, MirrorService},
};

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub mirror: Arc<dyn MirrorClientFactory>,
    pub blobs: Arc<dyn BlobStore>,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mirror_notify=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn rate_limit_response(error: GovernorError) -> http::Response<Body> {
    match error {
        GovernorError::TooManyRequests { wait_time, headers } => {
            // Same shape as `AppError` JSON bodies
            let body = serde_json::json!({
                "error": {
                    "code": "RATE_LIMITED",
                    "message": "Rate limit exceeded",
                    "details": { "retry_after_seconds": wait_time }
                }
            })
            .to_string();

            let mut resp = http::Response::new(Body::from(body));
            *resp.status_mut() = StatusCode::TOO_MANY_REQUESTS;
            resp.headers_mut().insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }
            resp.headers_mut()
                .insert(http::header::RETRY_AFTER, HeaderValue::from(wait_time));
            resp
        }
        GovernorError::UnableToExtractKey => {
            let body = serde_json::json!({
                "error": {
                    "code": "INVALID_REQUEST",
                    "message": "Unable to determine client IP for rate limiting"
                }
            })
            .to_string();

            let mut resp = http::Response::new(Body::from(body));
            *resp.status_mut() = StatusCode::BAD_REQUEST;
            resp.headers_mut().insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            resp
        }
        GovernorError::Other { code, msg, headers } => {
            let body = msg.unwrap_or_else(|| "Rate limiting error".to_string());
            let mut resp = http::Response::new(Body::from(body));
            *resp.status_mut() =
                StatusCode::from_u16(code.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }
            resp
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    init_tracing(config.server.log_json);

    tracing::info!("Starting Mirror notification service");

    let pool = init::init_db(&config).await?;
    let blobs = init::init_blob_store(&config, pool.clone()).await?;
    let mirror = MirrorService::new(&config)?;

    let app_state = Arc::new(AppState {
        db: pool,
        config: config.clone(),
        mirror: Arc::new(mirror),
        blobs: Arc::new(blobs),
    });

    let thread_shutdown = Arc::new(AtomicBool::new(false));

    let mut notify_builder = GovernorConfigBuilder::default();
    notify_builder.per_second(config.rate_limit.notify_per_second.into());
    notify_builder.burst_size(config.rate_limit.notify_burst);
    notify_builder.key_extractor(SmartIpKeyExtractor);
    notify_builder.error_handler(rate_limit_response);
    let notify_gov_conf = Arc::new(
        notify_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build notify governor config"))?,
    );

    // Limiter storage grows per client IP; prune it once a minute.
    let notify_cleaner = {
        let limiter = notify_gov_conf.limiter().clone();
        let interval = Duration::from_secs(60);
        let flag = thread_shutdown.clone();
        std::thread::spawn(move || {
            let tick = Duration::from_secs(1);
            loop {
                for _ in 0..interval.as_secs() {
                    if flag.load(Ordering::SeqCst) {
                        tracing::info!("Notify rate limiter cleanup thread exiting");
                        return;
                    }
                    std::thread::sleep(tick);
                }
                tracing::debug!("notify rate limiter size: {}", limiter.len());
                limiter.retain_recent();
            }
        })
    };

    let notify_rate_layer = GovernorLayer {
        config: notify_gov_conf.clone(),
    };

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .merge(routes::notify::router(config.notify.max_body_bytes).layer(notify_rate_layer))
        .merge(routes::blobs::router())
        .with_state(app_state.clone())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server_fut = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    let thread_shutdown_clone = thread_shutdown.clone();
    let signal_fut = async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = ctrl_c => {},
                        _ = term.recv() => {},
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to bind SIGTERM, waiting for Ctrl+C only: {}", e);
                    let _ = ctrl_c.await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        tracing::info!("Shutdown signal received");
        thread_shutdown_clone.store(true, Ordering::SeqCst);
    };

    tokio::select! {
        res = server_fut => {
            if let Err(e) = res {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = signal_fut => {
            tracing::info!("Server stopped accepting connections");
        }
    }

    thread_shutdown.store(true, Ordering::SeqCst);
    if notify_cleaner.join().is_err() {
        tracing::warn!("Notify rate limiter cleanup thread panicked");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
