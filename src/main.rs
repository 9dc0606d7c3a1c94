//! Meg server binary: wires the store, caches, registry and handler
//! together and mounts them on an HTTP harness.

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::Response as AxumResponse;
use axum::Router;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use meg::cache::MegCaches;
use meg::config::{Args, MegConfig};
use meg::format::FormatRegistry;
use meg::handler::{HandlerOptions, MegHandler};
use meg::invalidator::Invalidator;
use meg::mime::ExtensionMimeResolver;
use meg::planner::Planner;
use meg::store::s3::{S3ObjectStore, S3Options};
use meg::store::ObjectStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "meg=info".into()))
        .init();

    let config = match MegConfig::from_args(Args::parse()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("meg: {err}");
            std::process::exit(1);
        }
    };

    let store: Arc<dyn ObjectStore> = Arc::new(
        S3ObjectStore::connect(
            config.bucket.clone(),
            S3Options {
                region: config.region.clone(),
                endpoint_url: config.endpoint_url.clone(),
                access_key: config.access_key.clone(),
                secret_key: config.secret_key.clone(),
                force_path_style: config.endpoint_url.is_some(),
            },
        )
        .await,
    );

    let caches = Arc::new(MegCaches::in_memory());
    let registry = Arc::new(FormatRegistry::with_defaults());
    let mime = Arc::new(ExtensionMimeResolver::new());

    let planner = Planner::new(Arc::clone(&store), Arc::clone(&caches), registry);
    let handler = Arc::new(MegHandler::new(
        planner,
        mime,
        HandlerOptions {
            force_download: config.force_download,
            archive_ttl: config.archive_ttl,
        },
    ));

    let cancel = CancellationToken::new();
    let invalidator = Invalidator::new(Arc::clone(&store), Arc::clone(&caches));
    let invalidator_task = invalidator.spawn(None, cancel.clone());

    let app = Router::new().fallback(serve).with_state(handler);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(bucket = %config.bucket, %addr, "meg listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    cancel.cancel();
    let _ = invalidator_task.await;
    Ok(())
}

async fn serve(State(handler): State<Arc<MegHandler>>, uri: Uri) -> AxumResponse {
    let response = handler.handle(uri.path()).await;

    let mut builder = AxumResponse::builder().status(
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    );
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in &response.headers {
            if let (Ok(name), Ok(value)) = (
                name.parse::<HeaderName>(),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
    }
    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| AxumResponse::new(Body::empty()))
}
