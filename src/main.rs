use anyhow::Context;
use stevedore::cli::{Args, ExecutionMode, ProfileDiscovery, RunConfig, ShowProfileConfig};
use stevedore::container::{ContainerOption, ContainerOrchestrator};
use stevedore::env;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout only carries the container JSON
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(env::logging::DEFAULT_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.mode() {
        Ok(ExecutionMode::Run(config)) => run(config).await,
        Ok(ExecutionMode::ShowProfile(config)) => show_profile(config),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

async fn run(config: RunConfig) -> anyhow::Result<()> {
    let mut profile = ProfileDiscovery::load(config.profile.as_deref())?;
    profile.apply_overrides(&config)?;
    let (image, ports, mut options) = profile.to_start_request()?;

    // Ctrl-C aborts a pending readiness wait, and later stops the container
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            signal.cancel();
        }
    });
    options.push(ContainerOption::Cancellation(shutdown.clone()));

    if config.follow_logs {
        options.push(ContainerOption::log_sink(tokio::io::stderr()));
    }

    let orchestrator = ContainerOrchestrator::new()
        .await
        .context("Failed to connect to the container runtime")?;

    info!("Starting container from {}", image);
    let container = orchestrator
        .start(image, ports, options)
        .await
        .context("Container did not start")?;

    println!("{}", serde_json::to_string_pretty(&container)?);
    info!("Container {} is ready, press Ctrl-C to stop it", container.name);

    shutdown.cancelled().await;

    if let Err(e) = orchestrator.stop(&container).await {
        warn!("Failed to stop container {}: {}", container.name, e);
        return Err(e.into());
    }

    info!("Container {} stopped", container.name);
    Ok(())
}

fn show_profile(config: ShowProfileConfig) -> anyhow::Result<()> {
    if config.profile.is_none() {
        ProfileDiscovery::show_discovery_info();
        println!();
    }

    let profile = ProfileDiscovery::load(config.profile.as_deref())?;
    println!("{}", profile.redacted().to_toml_string()?);
    Ok(())
}
