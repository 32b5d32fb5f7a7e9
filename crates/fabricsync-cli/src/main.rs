//! fabricsync CLI - Drift, orphan and batch reconciliation for network fabrics

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use fabricsync_core::{ResourceState, Trigger};
use fabricsync_engine::{BatchStrategy, ResolutionStrategy};

mod commands;
mod display;
mod error;
mod exit_codes;

use commands::drift::DriftOptions;
use commands::reconcile::ReconcileOptions;
use commands::transitions::TransitionRequest;
use error::Result;

#[derive(Parser)]
#[command(name = "fabricsync")]
#[command(author = "fabricsync Contributors")]
#[command(version)]
#[command(about = "Keep a network fabric's cluster state reconciled with Git", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Reconcile policy file (YAML)
    #[arg(long, global = true, env = "FABRICSYNC_POLICY")]
    policy: Option<PathBuf>,

    /// Evaluate ages and timeouts as of this instant (RFC 3339) instead of now
    #[arg(long, global = true, value_name = "TIMESTAMP")]
    at: Option<DateTime<Utc>>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare Git against the cluster and show drift per resource
    Drift {
        /// Fabric snapshot file (YAML or JSON)
        snapshot: PathBuf,

        /// Show unified diffs of drifted resources
        #[arg(long)]
        diff: bool,

        /// Context lines around each diff hunk
        #[arg(long, default_value_t = 3)]
        context: usize,

        /// Exit with code 3 when any resource drifted
        #[arg(long)]
        exit_code: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show typed conflicts and how a strategy would settle them
    Conflicts {
        /// Fabric snapshot file (YAML or JSON)
        snapshot: PathBuf,

        /// Only this resource (namespace/kind/name)
        #[arg(short, long)]
        resource: Option<String>,

        /// Resolution strategy: automatic, favor_git, favor_cluster or manual
        #[arg(short, long, default_value = "automatic")]
        strategy: ResolutionStrategy,

        /// Print the desired spec with the plan applied
        #[arg(long)]
        show_merged: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List resources running in the cluster but absent from Git
    Orphans {
        /// Fabric snapshot file (YAML or JSON)
        snapshot: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Scan a fabric and remediate its open alerts in one batch
    Reconcile {
        /// Fabric snapshot file (YAML or JSON)
        snapshot: PathBuf,

        /// Batch strategy: sequential, parallel, dependency_aware or priority_based
        #[arg(short, long, default_value = "dependency_aware")]
        strategy: BatchStrategy,

        /// Check every action without changing anything
        #[arg(long)]
        dry_run: bool,

        /// User recorded as the requester (approves deletions)
        #[arg(long, env = "FABRICSYNC_USER")]
        requested_by: Option<String>,

        /// Make Git and cluster calls fail for this resource (namespace/kind/name)
        #[arg(long, value_name = "RESOURCE", hide = true)]
        fail_on: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the lifecycle transition table
    Transitions {
        /// Only transitions leaving this state
        #[arg(long)]
        from: Option<ResourceState>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Move one resource to another lifecycle state
    Transition {
        /// Fabric snapshot file (YAML or JSON)
        snapshot: PathBuf,

        /// Resource to move (namespace/kind/name)
        resource: String,

        /// Target state
        #[arg(long)]
        to: ResourceState,

        /// Trigger for the transition
        #[arg(long)]
        trigger: Trigger,

        /// Audit reason
        #[arg(long)]
        reason: Option<String>,

        /// Approving user, required for approval-gated transitions
        #[arg(long)]
        approved_by: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_env("FABRICSYNC_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if debug { "debug" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let now = cli.at.unwrap_or_else(Utc::now);
    let policy = cli.policy.as_deref();

    match cli.command {
        Commands::Drift {
            snapshot,
            diff,
            context,
            exit_code,
            json,
        } => {
            let options = DriftOptions {
                show_diff: diff,
                context,
                exit_code,
                json,
            };
            commands::drift::run(&snapshot, policy, &options, now).await
        }

        Commands::Conflicts {
            snapshot,
            resource,
            strategy,
            show_merged,
            json,
        } => {
            commands::conflicts::run(
                &snapshot,
                policy,
                resource.as_deref(),
                strategy,
                show_merged,
                json,
            )
            .await
        }

        Commands::Orphans { snapshot, json } => {
            commands::orphans::run(&snapshot, policy, json, now).await
        }

        Commands::Reconcile {
            snapshot,
            strategy,
            dry_run,
            requested_by,
            fail_on,
            json,
        } => {
            let options = ReconcileOptions {
                strategy,
                dry_run,
                requested_by,
                fail_on,
                json,
            };
            commands::reconcile::run(&snapshot, policy, &options, now).await
        }

        Commands::Transitions { from, json } => commands::transitions::run_table(from, json),

        Commands::Transition {
            snapshot,
            resource,
            to,
            trigger,
            reason,
            approved_by,
            json,
        } => {
            let request = TransitionRequest {
                resource: &resource,
                to,
                trigger,
                reason: reason.as_deref(),
                approved_by: approved_by.as_deref(),
            };
            commands::transitions::run_execute(&snapshot, policy, &request, json, now).await
        }
    }
}
