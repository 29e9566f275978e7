//! companionctl - Headless host for the companion application supervisor

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use single_instance::SingleInstance;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use companionctl::core::{
    AppSpec, ConfigWatcher, InitError, LifecycleController, PollingEventSource, RetryObserver,
    Settings, SharedAppList, Supervisor, SubscriptionState, SystemProcessDirectory,
};
use companionctl::{APP_NAME, APP_VERSION};

#[derive(Parser)]
#[command(name = APP_NAME, version, about = "Start and stop companion apps with a target application")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Supervise companions until Ctrl-C (default)
    Run,
    /// Act once as if the target had just started
    SimulateStart,
    /// Act once as if the target had just stopped
    SimulateStop,
    /// Print which managed apps are running
    Status,
    /// Print the app entry for a script, ready to paste into the configuration
    ScriptSpec {
        path: PathBuf,
        #[arg(long)]
        auto_start: bool,
        #[arg(long)]
        auto_close: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Settings::default_path);
    let settings = Settings::load_or_default(&config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;

    init_logging(settings.debug_logging);
    info!("{} v{} starting...", APP_NAME, APP_VERSION);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(settings, config_path).await,
        Command::SimulateStart => simulate(settings, true).await,
        Command::SimulateStop => simulate(settings, false).await,
        Command::Status => status(settings).await,
        Command::ScriptSpec {
            path,
            auto_start,
            auto_close,
        } => script_spec(&path, auto_start, auto_close),
    }
}

/// Initialize the logging system
fn init_logging(debug: bool) {
    let default = if debug {
        "companionctl=debug"
    } else {
        "companionctl=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Keep stdout free for command output
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(settings: Settings, config_path: PathBuf) -> Result<()> {
    // Two supervisors would fight over the same companions
    let instance = SingleInstance::new(APP_NAME).context("Failed to create single instance lock")?;
    if !instance.is_single() {
        error!("Another instance of {} is already running!", APP_NAME);
        return Ok(());
    }

    let apps = SharedAppList::new(settings.apps.clone());
    info!("Loaded {} apps from {:?}", apps.len(), config_path);
    let _config_watcher = match ConfigWatcher::spawn(config_path, apps.clone()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!(error = %e, "Configuration hot reload unavailable");
            None
        }
    };

    let observer: RetryObserver = Arc::new(|progress| {
        info!(
            attempt = progress.attempt,
            max_attempts = progress.max_attempts,
            "Subscription quota exceeded, retrying in {}s",
            progress.delay_seconds
        );
    });
    let supervisor = Arc::new(Supervisor::new(
        Arc::new(apps),
        Arc::new(SystemProcessDirectory::new()),
        Arc::new(PollingEventSource::new(
            settings.poll_interval(),
            settings.max_subscriptions,
        )),
        &settings.target_pattern,
        Some(observer),
    ));

    let shutdown = CancellationToken::new();
    {
        let supervisor = Arc::clone(&supervisor);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
            info!("Ctrl-C received, shutting down");
            supervisor.dispose();
            shutdown.cancel();
        });
    }

    if let Err(e) = supervisor.start().await {
        let message = fatal_message(&e);
        error!(fatal = true, error = %e, "{}", message);
        supervisor.dispose();
        return Err(anyhow::Error::new(e).context(message));
    }
    if supervisor.state() != SubscriptionState::Active {
        info!("{} shutting down", APP_NAME);
        return Ok(());
    }

    let inventory = supervisor.refresh().await;
    info!(
        pattern = %settings.target_pattern,
        running = inventory.len(),
        "Watching for the target application"
    );

    shutdown.cancelled().await;
    info!("{} shutting down", APP_NAME);
    Ok(())
}

fn fatal_message(e: &InitError) -> &'static str {
    if e.is_quota_exhausted() {
        "Cannot watch the target application: the system limit on process \
         notifications is still reached. Close other monitoring tools and restart."
    } else {
        "Cannot watch the target application: subscribing to process notifications failed."
    }
}

fn controller(settings: Settings) -> Arc<LifecycleController> {
    Arc::new(LifecycleController::new(
        Arc::new(SharedAppList::new(settings.apps)),
        Arc::new(SystemProcessDirectory::new()),
    ))
}

async fn simulate(settings: Settings, started: bool) -> Result<()> {
    let controller = controller(settings);
    let inventory = if started {
        controller.simulate_started().await
    } else {
        controller.simulate_stopped().await
    };
    let Some(inventory) = inventory else {
        bail!("Handling the simulated event failed, see the log for details");
    };
    println!("{}", serde_json::to_string_pretty(&inventory)?);
    Ok(())
}

async fn status(settings: Settings) -> Result<()> {
    let inventory = controller(settings).refresh().await;
    println!("{}", serde_json::to_string_pretty(&inventory)?);
    Ok(())
}

fn script_spec(path: &Path, auto_start: bool, auto_close: bool) -> Result<()> {
    let Some(app) = AppSpec::for_script(path) else {
        bail!(
            "{:?} is not a supported script (expected .ps1, .py, .bat or .cmd)",
            path
        );
    };
    let app = app.with_auto_start(auto_start).with_auto_close(auto_close);
    println!("{}", serde_json::to_string_pretty(&app)?);
    Ok(())
}
