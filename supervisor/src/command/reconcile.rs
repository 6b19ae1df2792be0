use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

use crate::command::open_state;
use crate::core::platform::ObjectKey;
use crate::core::reconcile::reconcile_cluster;

#[derive(Parser, Debug, Clone)]
pub struct ReconcileArgs {
    #[arg(long)]
    pub index: PathBuf,

    #[arg(long)]
    pub namespace: String,

    /// Cluster name
    #[arg(long)]
    pub name: String,

    /// Upper bound for any probe request (e.g., "10s")
    #[arg(long, default_value = "10s")]
    pub http_timeout: String,
}

/// Runs a single tick and prints the outcome.
pub async fn reconcile(args: ReconcileArgs) -> anyhow::Result<()> {
    let http_timeout =
        humantime::parse_duration(&args.http_timeout).context("invalid --http-timeout")?;
    let state = open_state(&args.index, http_timeout)?;

    let key = ObjectKey::new(&args.namespace, &args.name);
    let outcome = reconcile_cluster(&state, &key).await?;

    println!(
        "cluster={} membership={:?} reason={} size={}",
        outcome.cluster, outcome.membership, outcome.quorum.condition, outcome.quorum.size
    );
    Ok(())
}
