use std::{net::SocketAddr, sync::Arc};

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tutorgate::{
    config,
    middleware::recovery::install_panic_hook,
    routes,
    session::{InMemorySessionService, Role, User},
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging (stdout + daily rotated file under ./logs)
    std::fs::create_dir_all("logs").ok();
    let (stdout_nb, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let file_appender = tracing_appender::rolling::daily("logs", "tutorgate.log");
    let (file_nb, file_guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(stdout_nb))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_nb))
        .init();
    // Keep guards alive so the non-blocking writers flush on exit
    let _log_guards = (stdout_guard, file_guard);

    install_panic_hook();

    // Load configuration (embedded defaults -> tutorgate.toml -> env/.env)
    let app_cfg = config::load()?;

    let sessions = Arc::new(InMemorySessionService::from_config(&app_cfg.session));
    if app_cfg.session.is_production() {
        warn!("Running with the in-memory session store; sessions are lost on restart");
    } else {
        let user = User::new("demo@tutorgate.local", Role::Student);
        let user_id = user.id;
        sessions.insert_user(user).await;
        let (token, _) = sessions.create_session(user_id).await?;
        info!(%user_id, "Seeded demo session. Use cookie: session={}", token);
    }

    let state = AppState::new(app_cfg.clone(), sessions);
    let app = routes::router(state.clone());

    // Server listen addr (from config)
    let port: u16 = app_cfg.server.port;
    let host: String = app_cfg.server.host.clone();
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen addr {}:{} - {}", host, port, e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Tutorgate listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received. Stopping server...");
}
