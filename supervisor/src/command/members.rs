use anyhow::{Context, bail};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::command::open_state;
use crate::core::cluster::{ClusterSpec, membership_key_for};
use crate::core::discovery::bootstrap_nodes;
use crate::core::membership::{self, split_members};

#[derive(Parser, Debug, Clone)]
pub struct MembersArgs {
    /// Required unless --bootstrap is set
    #[arg(long)]
    pub index: Option<PathBuf>,

    #[arg(long, default_value = "default")]
    pub namespace: String,

    /// Cluster name
    #[arg(long)]
    pub name: String,

    /// Print the bootstrap peer list instead of the stored record
    #[arg(long, default_value_t = false)]
    pub bootstrap: bool,

    #[arg(long, default_value_t = 3)]
    pub replicas: u32,

    #[arg(long, default_value_t = common::constants::DEFAULT_PEERING_PORT)]
    pub peering_port: u16,

    #[arg(long, default_value_t = common::constants::DEFAULT_API_PORT)]
    pub api_port: u16,
}

pub async fn members(args: MembersArgs) -> anyhow::Result<()> {
    if args.bootstrap {
        let mut spec = ClusterSpec::new(&args.namespace, &args.name, args.replicas);
        spec.peering_port = args.peering_port;
        spec.api_port = args.api_port;

        for node in bootstrap_nodes(&spec, args.replicas)? {
            println!("{}", node);
        }
        return Ok(());
    }

    let Some(index) = args.index.as_ref() else {
        bail!("--index is required to read a stored membership record");
    };
    let state = open_state(index, Duration::from_secs(1))?;

    let key = membership_key_for(&args.namespace, &args.name);
    let record = membership::read(state.platform.as_ref(), &key)
        .await?
        .with_context(|| format!("no membership record for {}", key))?;

    println!("nodes:");
    for node in split_members(&record.nodes) {
        println!("  {}", node);
    }
    println!("fallback:");
    for node in split_members(&record.fallback) {
        println!("  {}", node);
    }
    Ok(())
}
