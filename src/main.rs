use mimalloc::MiMalloc;
use planpilot::config::Config;
use planpilot::server::{PilotState, pilot_router};
use std::net::SocketAddr;
use tokio::{net::TcpListener, signal};
use tracing::info;
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;
    planpilot::utils::logging::init(&cfg.basic.loglevel);

    info!(
        loglevel = %cfg.basic.loglevel,
        listen_addr = %cfg.basic.listen_addr,
        listen_port = cfg.basic.listen_port,
        upstream = %cfg.llm.upstream_url,
        model = %cfg.llm.model,
        proxy = %cfg.llm.proxy.as_ref().map_or("<none>", |u| u.as_str()),
        rps = cfg.llm.rps,
        key_guard = !cfg.basic.access_key.is_empty(),
        "PlanPilot assistant endpoint starting"
    );
    if cfg.llm.api_key.is_empty() {
        tracing::warn!("llm.api_key is empty; upstream calls will be rejected");
    }

    let state = PilotState::new(&cfg);
    let app = pilot_router(state, &cfg.basic.allowed_origins);

    let addr = SocketAddr::from((cfg.basic.listen_addr, cfg.basic.listen_port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server has shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
