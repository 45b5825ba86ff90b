mod admin;
mod error;
mod handlers;
mod state;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use control_plane::{AdmissionController, BackendState, Config, Metrics, TemplateWatcher};
use data_plane::{BackendClient, ChatInterceptor, KvCacheClient, WarmupScheduler};

use crate::state::{AdminState, ProxyState};

#[derive(Parser, Debug)]
#[command(author, version, about = "Reverse proxy with KV cache warmup for LLM backends")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "bioproxy.json")]
    config: PathBuf,
    /// Override the proxy bind host (use 0.0.0.0 for all interfaces).
    #[arg(long)]
    host: Option<String>,
    /// Override the proxy port.
    #[arg(long)]
    port: Option<u16>,
    /// Override the admin bind host.
    #[arg(long)]
    admin_host: Option<String>,
    /// Override the admin port.
    #[arg(long)]
    admin_port: Option<u16>,
    /// Override the backend base URL.
    #[arg(long)]
    backend: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::load(&args.config)?;
    if let Some(host) = args.host {
        config.proxy_host = host;
    }
    if let Some(port) = args.port {
        config.proxy_port = port;
    }
    if let Some(host) = args.admin_host {
        config.admin_host = host;
    }
    if let Some(port) = args.admin_port {
        config.admin_port = port;
    }
    if let Some(backend) = args.backend {
        config.backend_url = backend;
    }

    info!(
        proxy = %config.proxy_addr(),
        admin = %config.admin_addr(),
        backend = %config.backend_url,
        "starting bioproxy"
    );

    let metrics = Metrics::shared();
    let backend_state = BackendState::shared();
    let admission = AdmissionController::shared();
    let watcher = TemplateWatcher::shared();
    for (prefix, path) in &config.prefixes {
        if let Err(err) = watcher.add(prefix, path) {
            warn!(prefix = %prefix, error = %err, "skipping template");
        }
    }

    let backend = Arc::new(BackendClient::new(&config.backend_url));
    let kvcache = Arc::new(KvCacheClient::new(&config.backend_url, metrics.clone()));
    let interceptor = Arc::new(ChatInterceptor::new(
        admission.clone(),
        backend_state.clone(),
        watcher.clone(),
        kvcache.clone(),
        backend.clone(),
        metrics.clone(),
    ));
    let scheduler = Arc::new(WarmupScheduler::new(
        admission,
        backend_state.clone(),
        watcher,
        kvcache,
        backend.clone(),
        metrics.clone(),
        Duration::from_secs(config.warmup_check_interval),
    ));
    let warmup = scheduler.start();

    let proxy_app = handlers::proxy_router(Arc::new(ProxyState {
        interceptor,
        backend,
        metrics: metrics.clone(),
    }));
    let admin_app = admin::router(Arc::new(AdminState {
        metrics,
        backend_state,
    }));

    let proxy_listener = TcpListener::bind(config.proxy_addr()).await?;
    let admin_listener = TcpListener::bind(config.admin_addr()).await?;
    info!("proxy listening on {}", config.proxy_addr());
    info!("admin listening on {}", config.admin_addr());

    let proxy_shutdown = CancellationToken::new();
    let admin_shutdown = CancellationToken::new();
    let proxy_task = tokio::spawn({
        let token = proxy_shutdown.clone();
        async move {
            axum::serve(proxy_listener, proxy_app.into_make_service())
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        }
    });
    let admin_task = tokio::spawn({
        let token = admin_shutdown.clone();
        async move {
            axum::serve(admin_listener, admin_app.into_make_service())
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        }
    });

    wait_for_shutdown().await;
    info!("shutdown signal received, stopping servers");

    warmup.stop().await;
    admin_shutdown.cancel();
    admin_task.await??;
    proxy_shutdown.cancel();
    proxy_task.await??;

    info!("servers stopped cleanly");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}
