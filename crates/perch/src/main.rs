use clap::{Parser, Subcommand};
use perch_framework::{FrameworkOptions, PluginConfig, Plugins};
use perch_scheduler::{
    build_framework, ClusterFixture, LoggingBindingSink, Scheduler, SchedulerConfig,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "perch", about = "Perch - pluggable pod scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler against a cluster fixture
    Run {
        /// Path to a YAML cluster fixture (nodes + pending pods)
        #[arg(long)]
        cluster: String,
        /// Path to a YAML scheduling profile; the in-tree defaults apply
        /// when omitted
        #[arg(long)]
        profile: Option<String>,
        /// Seconds between scheduling cycles
        #[arg(long, default_value_t = 1)]
        interval_secs: u64,
        /// Run a single scheduling cycle and exit
        #[arg(long, default_value_t = false)]
        once: bool,
    },
}

/// A scheduling profile loaded from YAML.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Profile {
    name: String,
    run_all_filters: bool,
    plugins: Option<Plugins>,
    plugin_config: Vec<PluginConfig>,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            cluster,
            profile,
            interval_secs,
            once,
        } => run(&cluster, profile.as_deref(), interval_secs, once).await,
    }
}

/// Wait for either SIGINT (ctrl-c) or SIGTERM, returning which one fired.
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: &str, what: &str) -> miette::Result<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("Failed to read {what} file '{path}': {e}"))?;
    serde_yaml::from_str(&raw).map_err(|e| miette::miette!("Invalid {what} file '{path}': {e}"))
}

async fn run(
    cluster_path: &str,
    profile_path: Option<&str>,
    interval_secs: u64,
    once: bool,
) -> miette::Result<()> {
    let fixture: ClusterFixture = load_yaml(cluster_path, "cluster")?;
    let snapshot = Arc::new(fixture.into_snapshot());

    let profile: Profile = match profile_path {
        Some(path) => load_yaml(path, "profile")?,
        None => Profile::default(),
    };
    let profile_name = if profile.name.is_empty() {
        "default".to_string()
    } else {
        profile.name
    };
    let plugins = profile
        .plugins
        .unwrap_or_else(perch_scheduler::default_plugins);

    let framework = build_framework(
        snapshot.clone(),
        &plugins,
        &profile.plugin_config,
        FrameworkOptions::new()
            .with_profile_name(&profile_name)
            .with_run_all_filters(profile.run_all_filters)
            .with_metrics_recorder(1000, Duration::from_secs(1)),
    )
    .map_err(|e| miette::miette!("Failed to build the scheduling framework: {e}"))?;

    for (extension_point, plugins) in framework.list_plugins() {
        let names: Vec<&str> = plugins.iter().map(|p| p.name.as_str()).collect();
        info!("{extension_point}: {}", names.join(", "));
    }

    let config = SchedulerConfig {
        schedule_interval: Duration::from_secs(interval_secs.max(1)),
        ..Default::default()
    };
    let scheduler = Scheduler::new(
        Arc::new(framework),
        snapshot,
        Arc::new(LoggingBindingSink),
        config,
    );

    if once {
        let token = CancellationToken::new();
        scheduler
            .schedule_cycle(&token)
            .await
            .map_err(|e| miette::miette!("Scheduling cycle failed: {e}"))?;
        info!("Completed one scheduling cycle");
        return Ok(());
    }

    let token = CancellationToken::new();
    let scheduler_token = token.clone();
    let handle = tokio::spawn(async move { scheduler.run(scheduler_token).await });

    let sig = shutdown_signal().await;
    info!("Received {sig}, shutting down gracefully...");
    token.cancel();

    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    info!("Shutdown complete");

    Ok(())
}
