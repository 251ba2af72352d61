use anyhow::Context;
use clap::Parser;
use common::ShutdownMessage;
use engine::server::engine_args::EngineArgs;
use engine::server::{http_front, mysql_front, postgres_front, resp_front, serve_wire};
use engine::store::{persist, CaptureStore};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::sync::watch::Receiver;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Resolves once anything lands on the shutdown channel; the axum servers
/// take this as their graceful-shutdown future. An `Err` from `changed`
/// means the sender half is already gone, which is shutdown too.
async fn shutdown_observed(mut shutdown_rx: Receiver<ShutdownMessage>) {
    let _ = shutdown_rx.changed().await;
}

/// Sleeps until the replay deadline, or forever when none is set.
async fn deadline_reached(exit_after_secs: Option<u64>) {
    match exit_after_secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending::<()>().await,
    }
}

fn main() -> anyhow::Result<()> {
    let engine_config = EngineArgs::parse();
    let log_level_string = engine_config
        .log_level
        .clone()
        .unwrap_or("INFO".to_string());
    let level = Level::from_str(log_level_string.as_str())?;
    // setup tracing, pin chatty http internals to INFO.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("INFO,hyper=INFO,tower=INFO,h2=INFO"))
        .add_directive(level.into())
        .add_directive("hyper=INFO".parse().unwrap())
        .add_directive("h2=INFO".parse().unwrap())
        .add_directive("tower=INFO".parse().unwrap());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_line_number(true)
        .init();

    let works = engine_config.works;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("VERITASERUM")
        .worker_threads(works)
        .build()?;

    info!("veritaserum running config args={:?}", engine_config);
    if engine_config.enable_metrics {
        common::metrics::init_metrics_context();
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownMessage::Init);
    let store = Arc::new(CaptureStore::new());

    runtime.block_on(async {
        let state_path = PathBuf::from(&engine_config.state_file);

        if engine_config.replay {
            let suite_file = engine_config
                .suite
                .clone()
                .context("--suite is required with --replay")?;
            let suite = persist::load_suite(PathBuf::from(&suite_file).as_path())?;
            let loaded = store.import_suite(suite);
            info!("replay mode: hydrated {loaded} configured interactions from {suite_file}");
        } else {
            if let Some(state) = persist::load_state(&state_path)? {
                info!("restoring persisted state from {}", state_path.display());
                store.restore_state(state);
            }
            let rest_store = Arc::clone(&store);
            let rest_shutdown = shutdown_observed(shutdown_rx.clone());
            let admin_port = engine_config.admin_port;
            let enable_metrics = engine_config.enable_metrics;
            let rest_state_path = state_path.clone();
            tokio::spawn(async move {
                if let Err(e) = web_service::http_server::VeritaserumRest::start_server(
                    "0.0.0.0".to_string(),
                    admin_port,
                    rest_store,
                    rest_state_path,
                    enable_metrics,
                    rest_shutdown,
                )
                .await
                {
                    warn!("management server failed. cause by {e:?}");
                }
            });
        }

        let mysql_listener = TcpListener::bind(engine_config.bind_addr(engine_config.mysql_port))
            .await
            .context("binding MySQL listener")?;
        let postgres_listener =
            TcpListener::bind(engine_config.bind_addr(engine_config.postgres_port))
                .await
                .context("binding PostgreSQL listener")?;
        let redis_listener = TcpListener::bind(engine_config.bind_addr(engine_config.redis_port))
            .await
            .context("binding RESP listener")?;
        let http_listener = TcpListener::bind(engine_config.bind_addr(engine_config.http_port))
            .await
            .context("binding HTTP proxy listener")?;

        tokio::spawn(serve_wire(
            "mysql",
            mysql_listener,
            Arc::clone(&store),
            shutdown_rx.clone(),
            mysql_front::handle_conn,
        ));
        tokio::spawn(serve_wire(
            "postgres",
            postgres_listener,
            Arc::clone(&store),
            shutdown_rx.clone(),
            postgres_front::handle_conn,
        ));
        tokio::spawn(serve_wire(
            "redis",
            redis_listener,
            Arc::clone(&store),
            shutdown_rx.clone(),
            resp_front::handle_conn,
        ));
        let proxy_store = Arc::clone(&store);
        let proxy_shutdown = shutdown_observed(shutdown_rx.clone());
        tokio::spawn(async move {
            if let Err(e) = http_front::serve(http_listener, proxy_store, proxy_shutdown).await {
                warn!("http proxy listener failed. cause by {e:?}");
            }
        });

        // block until something asks us to stop: ctrl-c, SIGTERM, or the
        // --exit-after-secs deadline. Whichever fires first feeds the watch
        // channel every listener hangs off.
        let mut sigterm =
            signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        let reason = tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for ctrl-c")?;
                "ctrl-c received".to_string()
            }
            _ = sigterm.recv() => "SIGTERM received".to_string(),
            _ = deadline_reached(engine_config.exit_after_secs) => "exit deadline reached".to_string(),
        };
        info!("veritaserum shutting down: {reason}");
        shutdown_tx.send(ShutdownMessage::Cancel(reason)).ok();

        // let listeners observe the shutdown signal before the runtime drops.
        tokio::time::sleep(Duration::from_millis(100)).await;
        anyhow::Ok(())
    })?;
    Ok(())
}
