use std::net::SocketAddr;

use chrono::Utc;
use sigb::{config::{self, DirectoryMode}, db, services, state::AppState};
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Sqlite, SqlitePool};
use tokio::time::{self, Duration as TokioDuration};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs : stdout + fichier journalier sous ./logs
    std::fs::create_dir_all("logs").ok();
    let (stdout_nb, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let file_appender = tracing_appender::rolling::daily("logs", "sigb.log");
    let (file_nb, file_guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(stdout_nb))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_nb))
        .init();
    // Garder les guards en vie pour que les writers non bloquants vident leur tampon
    let _log_guards = (stdout_guard, file_guard);

    // embedded defaults -> sigb.toml -> SIGB_CONFIG -> env
    let app_cfg = config::load()?;

    let db_url = &app_cfg.database.url;
    config::ensure_sqlite_parent_dir(db_url)?;
    if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
        info!("Creating SQLite database at {}", db_url);
        Sqlite::create_database(db_url).await?;
    }
    let pool = SqlitePoolOptions::new()
        .max_connections(app_cfg.database.max_connections.unwrap_or(16))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys=ON;").execute(&mut *conn).await?;
                let _ = sqlx::query("PRAGMA journal_mode=WAL;").execute(&mut *conn).await;
                let _ = sqlx::query("PRAGMA busy_timeout=10000;").execute(&mut *conn).await;
                let _ = sqlx::query("PRAGMA synchronous=NORMAL;").execute(&mut *conn).await;
                let _ = sqlx::query("PRAGMA temp_store=MEMORY;").execute(&mut *conn).await;
                Ok(())
            })
        })
        .connect(db_url)
        .await?;

    db::init_db(&pool).await?;
    std::fs::create_dir_all(&app_cfg.storage.root)?;

    let state = AppState::new(pool.clone(), app_cfg.clone());
    info!(
        directory = ?app_cfg.directory.mode,
        storage = %app_cfg.storage.root,
        "SIGB state initialised"
    );
    if app_cfg.directory.mode == DirectoryMode::Static {
        tracing::warn!(accounts = app_cfg.directory.accounts.len(), "Static directory in use: development only");
    }

    let shutdown = CancellationToken::new();

    // Nettoyage périodique des limiteurs par endpoint
    {
        let rl = state.rate_limiter.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(TokioDuration::from_secs(300));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => rl.cleanup_all().await,
                }
            }
        });
    }

    let jobs = tokio::spawn(circulation_job(state.clone(), shutdown.clone()));

    let app = sigb::build_router(state);

    let port: u16 = app_cfg.server.port;
    let host: String = app_cfg.server.host.clone();
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen addr {}:{} - {}", host, port, e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("SIGB listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Err(e) = jobs.await {
        tracing::warn!("Circulation job ended abnormally: {}", e);
    }
    pool.close().await;
    info!("SIGB stopped");
    Ok(())
}

/// Periodic circulation housekeeping: overdue flags, expired holds, stale sessions.
async fn circulation_job(state: AppState, token: CancellationToken) {
    let period = TokioDuration::from_secs(state.config.jobs.circulation_interval_seconds);
    let mut ticker = time::interval(period);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => run_circulation_pass(&state).await,
        }
    }
    info!("Circulation job stopped");
}

async fn run_circulation_pass(state: &AppState) {
    let now = Utc::now();
    let db: &SqlitePool = &state.db;

    if let Err(e) = services::loans::refresh_overdue(db, now).await {
        tracing::error!("Overdue refresh failed: {}", e);
    }
    match services::reservations::expire_holds(db, &state.config.reservations, now).await {
        Ok(n) if n > 0 => state.catalog_cache.invalidate(),
        Ok(_) => {}
        Err(e) => tracing::error!("Reservation expiry failed: {}", e),
    }
    match services::users::purge_expired_sessions(db, now).await {
        Ok(n) if n > 0 => tracing::debug!(purged = n, "Expired sessions purged"),
        Ok(_) => {}
        Err(e) => tracing::error!("Session purge failed: {}", e),
    }
}

async fn shutdown_signal(token: CancellationToken) {
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
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received. Stopping server...");
    token.cancel();
}
