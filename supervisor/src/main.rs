use clap::{Parser, Subcommand};

use common::telemetry::init_telemetry;

use supervisor::command::members::{MembersArgs, members};
use supervisor::command::reconcile::{ReconcileArgs, reconcile};
use supervisor::command::serve::{ServeArgs, serve};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
enum Cmd {
    /// Run the admin server and the reconcile loop
    Serve(ServeArgs),
    /// Run one reconciliation tick for a cluster
    Reconcile(ReconcileArgs),
    /// Print a cluster's membership record or bootstrap peer list
    Members(MembersArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry("supervisor");

    let args = Args::parse();

    match args.cmd {
        Cmd::Serve(serve_args) => {
            serve(serve_args).await?;
        }
        Cmd::Reconcile(reconcile_args) => {
            reconcile(reconcile_args).await?;
        }
        Cmd::Members(members_args) => {
            members(members_args).await?;
        }
    }

    Ok(())
}
