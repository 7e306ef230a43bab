use std::process::ExitCode;
use std::sync::Arc;

use argocd_guardian::argocd::{ArgoCdClient, ControlPlane};
use argocd_guardian::config::{webhook_from_secret, ArgoCdArgs, GuardianArgs, WebhookSource};
use argocd_guardian::controller::{Reconciler, ReconcilerConfig};
use argocd_guardian::notify::{LogNotifier, Notifier, SlackNotifier};
use argocd_guardian::rollback::{DisabledRollback, GitRollback, RollbackExecutor};
use argocd_guardian::scheduler::Scheduler;
use argocd_guardian::telemetry::{self, LogFormat};
use argocd_guardian::{Error, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch Argo CD applications until interrupted
    Run(GuardianArgs),
    /// Run a single reconcile cycle and print what was done
    Once(GuardianArgs),
    /// Show one application as the guardian sees it
    Status(StatusArgs),
    /// Show version and build information
    Version,
}

#[derive(Args, Debug)]
struct StatusArgs {
    #[command(flatten)]
    argocd: ArgoCdArgs,

    /// Application name
    name: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("argocd-guardian v{}", env!("CARGO_PKG_VERSION"));
        println!("Build Date: {}", env!("BUILD_DATE"));
        println!("Git SHA: {}", env!("GIT_SHA"));
        println!("Rust Version: {}", env!("RUST_VERSION"));
        return ExitCode::SUCCESS;
    }

    telemetry::init_tracing(cli.log_format);

    let result = match cli.command {
        Commands::Run(args) => run_guardian(args).await,
        Commands::Once(args) => run_single_cycle(args).await,
        Commands::Status(args) => run_status(args).await,
        Commands::Version => Ok(()),
    };

    // Flush any remaining traces
    telemetry::shutdown_telemetry();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.kind() == "config" => {
            error!("Invalid configuration: {}", e);
            ExitCode::from(2)
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Everything a polling command needs, wired from validated settings
struct Guardian {
    reconciler: Arc<Reconciler>,
    scheduler: Scheduler,
    http_addr: std::net::SocketAddr,
}

async fn build_guardian(args: GuardianArgs) -> Result<Guardian> {
    let settings = args.into_settings()?;

    info!(
        "Starting argocd-guardian v{} against {}",
        env!("CARGO_PKG_VERSION"),
        settings.argocd.api_url
    );
    if settings.reconciler.dry_run {
        warn!("Dry-run mode: no changes will be made to Argo CD, Slack or git");
    }

    let client = ArgoCdClient::connect(settings.argocd.clone(), settings.request_timeout).await?;
    let control_plane: Arc<dyn ControlPlane> = Arc::new(client);

    let notifier: Arc<dyn Notifier> = match &settings.webhook {
        WebhookSource::Url(url) => Arc::new(SlackNotifier::new(url.clone(), settings.request_timeout)?),
        WebhookSource::Secret {
            name,
            namespace,
            key,
        } => {
            let kube_client = kube::Client::try_default()
                .await
                .map_err(Error::KubeError)?;
            let url = webhook_from_secret(kube_client, namespace, name, key).await?;
            Arc::new(SlackNotifier::new(url, settings.request_timeout)?)
        }
        WebhookSource::LogOnly => {
            info!("No Slack webhook configured, notifications are logged only");
            Arc::new(LogNotifier)
        }
    };

    let rollback: Arc<dyn RollbackExecutor> = match settings.rollback.clone() {
        Some(config) => Arc::new(GitRollback::new(config, Arc::clone(&control_plane))),
        None => {
            info!("Git rollback disabled");
            Arc::new(DisabledRollback)
        }
    };

    log_reconciler_config(&settings.reconciler);

    let reconciler = Arc::new(Reconciler::new(
        settings.reconciler,
        Arc::clone(&control_plane),
        notifier,
        rollback,
    ));
    let scheduler = Scheduler::new(Arc::clone(&reconciler), control_plane, settings.scheduler);

    Ok(Guardian {
        reconciler,
        scheduler,
        http_addr: settings.http_addr,
    })
}

fn log_reconciler_config(config: &ReconcilerConfig) {
    let mut excluded: Vec<&str> = config.excluded_apps.iter().map(String::as_str).collect();
    excluded.sort_unstable();
    info!(
        "Max attempts {}, retry backoff {:?}, excluded apps [{}]",
        config.max_attempts,
        config.retry_backoff,
        excluded.join(", ")
    );
}

async fn run_guardian(args: GuardianArgs) -> Result<()> {
    let guardian = build_guardian(args).await?;

    // Start the REST API server
    #[cfg(feature = "rest-api")]
    {
        let api_reconciler = Arc::clone(&guardian.reconciler);
        let addr = guardian.http_addr;
        tokio::spawn(async move {
            if let Err(e) = argocd_guardian::rest_api::run_server(api_reconciler, addr).await {
                error!("REST API server error: {:?}", e);
            }
        });
    }
    #[cfg(not(feature = "rest-api"))]
    let _ = (&guardian.reconciler, guardian.http_addr);

    guardian.scheduler.run().await
}

async fn run_single_cycle(args: GuardianArgs) -> Result<()> {
    let guardian = build_guardian(args).await?;
    let report = guardian.scheduler.run_once().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_status(args: StatusArgs) -> Result<()> {
    let config = args.argocd.client_config()?;
    let timeout = args.argocd.request_timeout()?;
    let client = ArgoCdClient::connect(config, timeout).await?;

    let snapshot = client.get_application(&args.name, timeout).await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
