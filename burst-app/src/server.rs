//! Burstline server wiring: config, collaborators, scheduler, HTTP surface.

use crate::config::{BurstlineConfig, DeliveryMode, StorageMode};
use crate::config_control::ConfigControl;
use crate::delivery::{HttpReplySender, LogReplySender, ReplySender};
use crate::pipeline::ReplyPipeline;
use crate::prompts::PromptBook;
use crate::routes;
use anyhow::Result;
use axum::Extension;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use burst_core::BatchScheduler;
use burst_llm::LlmClient;
use burst_store::{MemoryStore, MessageStore, RestStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub config_control: Arc<ConfigControl>,
    pub scheduler: BatchScheduler,
    pub store: Arc<dyn MessageStore>,
    pub pipeline: Arc<ReplyPipeline>,
    pub started_at: Instant,
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = BurstlineConfig::load_with_path(config_path).await?;
    tracing::info!(
        bind_addr = %cfg.server.bind_addr,
        batch_wait_seconds = cfg.batching.delay_seconds,
        max_concurrent_batches = cfg.batching.max_concurrent_batches,
        storage_mode = ?cfg.storage.mode,
        delivery_mode = ?cfg.delivery.mode,
        llm_model = %cfg.llm.model,
        llm_configured = !cfg.llm.api_key.trim().is_empty(),
        config_path = %path.display(),
        "config ok"
    );
    Ok(())
}

pub async fn status(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = BurstlineConfig::load_with_path(config_path).await?;
    let url = format!("http://{}/health", cfg.server.bind_addr);
    let body: serde_json::Value = reqwest::Client::new()
        .get(&url)
        .timeout(Duration::from_secs(5))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    tracing::info!(
        health = %body,
        config_path = %path.display(),
        "status ok"
    );
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, cfg_path) = BurstlineConfig::load_with_path(config_path).await?;
    let started_at = Instant::now();
    let addr: SocketAddr = cfg
        .server
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid server.bind_addr {:?}: {e}", cfg.server.bind_addr))?;
    tracing::info!(
        bind_addr = %addr,
        batch_wait_seconds = cfg.batching.delay_seconds,
        max_concurrent_batches = cfg.batching.max_concurrent_batches,
        max_batch_age_seconds = cfg.batching.max_batch_age_seconds,
        storage_mode = ?cfg.storage.mode,
        delivery_mode = ?cfg.delivery.mode,
        llm_model = %cfg.llm.model,
        llm_configured = !cfg.llm.api_key.trim().is_empty(),
        http_timeout_seconds = cfg.server.http_timeout_seconds,
        http_max_in_flight = cfg.server.http_max_in_flight,
        "server configuration loaded"
    );
    let listener = preflight_bind_listener(addr).await?;

    let store: Arc<dyn MessageStore> = match cfg.storage.mode {
        StorageMode::Memory => {
            tracing::warn!("memory storage mode: conversation history is lost on restart");
            Arc::new(MemoryStore::new())
        }
        StorageMode::Rest => Arc::new(RestStore::new(
            &cfg.storage.rest_url,
            &cfg.storage.rest_api_key,
        )),
    };

    let llm = if cfg.llm.api_key.trim().is_empty() {
        tracing::warn!("llm.api_key not set: batches will flush without generating replies");
        None
    } else {
        Some(LlmClient::new(&cfg.llm.api_key, &cfg.llm.model))
    };

    let sender: Arc<dyn ReplySender> = match cfg.delivery.mode {
        DeliveryMode::Log => Arc::new(LogReplySender),
        DeliveryMode::Http => Arc::new(HttpReplySender::new(
            &cfg.delivery.api_url,
            &cfg.delivery.api_key,
            &cfg.delivery.api_version,
        )),
    };

    let prompts = Arc::new(PromptBook::from_config(&cfg.prompts));
    let pipeline = Arc::new(ReplyPipeline::new(
        store.clone(),
        llm,
        sender,
        prompts.clone(),
    ));
    let scheduler = BatchScheduler::new(cfg.batching.scheduler_config(), pipeline.clone())?;
    let scheduler_handle = scheduler.start();

    let config_control = Arc::new(ConfigControl::new(cfg_path, cfg.clone())?);
    let state = Arc::new(AppState {
        config_control,
        scheduler: scheduler.clone(),
        store,
        pipeline,
        started_at,
    });

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = routes::router()
        .layer(Extension(state))
        .layer(GlobalConcurrencyLimitLayer::new(cfg.server.http_max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.server.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    let shutdown = CancellationToken::new();
    tracing::info!(%addr, "burstline serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");

    scheduler.shutdown();
    match scheduler_handle.await {
        Ok(()) => tracing::info!("scheduler shutdown completed"),
        Err(e) => tracing::error!(error = %e, "scheduler task join failed during shutdown"),
    }

    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
    shutdown.cancel();
}
