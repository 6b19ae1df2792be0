use anyhow::Context;
use axum_server::Server;
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::info;

use common::url_utils::parse_socket_addr;

use crate::command::open_state;
use crate::core::resync::reconcile_loop;
use crate::core::routes::admin_router;

#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// RocksDB directory holding clusters, workloads, pods and membership records
    #[arg(long, default_value = "./data/index")]
    index: PathBuf,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Interval between reconciliation ticks (e.g., "30s", "2m")
    #[arg(long, default_value = "30s")]
    resync_interval: String,

    /// Upper bound for any probe request (e.g., "10s")
    #[arg(long, default_value = "10s")]
    http_timeout: String,
}

pub async fn serve(serve_args: ServeArgs) -> anyhow::Result<()> {
    let resync_interval = humantime::parse_duration(&serve_args.resync_interval)
        .context("invalid --resync-interval")?;
    let http_timeout =
        humantime::parse_duration(&serve_args.http_timeout).context("invalid --http-timeout")?;

    let state = open_state(&serve_args.index, http_timeout)?;

    let (shutdown_tx, shutdown_rx) = watch::channel::<bool>(false);
    let loop_handle = tokio::spawn(reconcile_loop(state.clone(), resync_interval, shutdown_rx));

    let app = admin_router(state);

    let socket_addr = parse_socket_addr(&serve_args.listen)?;
    let server = Server::bind(socket_addr).serve(app.into_make_service());

    info!(
        resync = %humantime::format_duration(resync_interval),
        "listening on {}", serve_args.listen
    );

    // Graceful shutdown: ctrl+c
    tokio::select! {
        res = server => { res?; }
        _ = tokio::signal::ctrl_c() => {}
    }

    let _ = shutdown_tx.send(true);
    let _ = loop_handle.await;

    Ok(())
}
