use netronome::cli::{Cli, Command};
use netronome::config::{defaults::CONFIG_TEMPLATE, Config};
use netronome::core::probe::hosted::HostedRunner;
use netronome::core::probe::iperf::IperfRunner;
use netronome::core::probe::librespeed::LibrespeedRunner;
use netronome::core::probe::runner::Runner;
use netronome::core::{
    auth, AgentPool, Broadcaster, Notifier, ProbeEngine, Scheduler, Store, Supervisor,
};
use netronome::error::Error;
use netronome::http::{self, AppState};
use std::io::Read;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("NETRONOME_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let result = match cli.command {
        Command::GenerateConfig { output, force } => generate_config(output, force),
        Command::CreateUser { username } => user_command(cli.config.as_deref(), &username, true).await,
        Command::ChangePassword { username } => {
            user_command(cli.config.as_deref(), &username, false).await
        }
        Command::Serve => serve(cli.config.as_deref()).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ Error::InvalidInput(_)) => {
            eprintln!("configuration error: {err}");
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn generate_config(
    output: Option<std::path::PathBuf>,
    force: bool,
) -> netronome::Result<()> {
    let path = output.unwrap_or_else(Config::default_config_path);
    if path.exists() && !force {
        return Err(Error::InvalidInput(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::Internal(format!("create {}: {e}", parent.display())))?;
    }
    std::fs::write(&path, CONFIG_TEMPLATE)
        .map_err(|e| Error::Internal(format!("write {}: {e}", path.display())))?;
    println!("wrote {}", path.display());
    Ok(())
}

/// `create-user` / `change-password`. The password arrives on stdin so it
/// never lands in shell history or the process list.
async fn user_command(
    config_path: Option<&std::path::Path>,
    username: &str,
    create: bool,
) -> netronome::Result<()> {
    let config = Config::load(config_path)?;
    ensure_config_dir(&config)?;
    let store = Store::open(&config.database_url()).await?;

    eprint!("password: ");
    let mut password = String::new();
    std::io::stdin()
        .read_to_string(&mut password)
        .map_err(|e| Error::Internal(format!("read password: {e}")))?;
    let password = password.trim_end_matches(['\n', '\r']);

    if create {
        let user = auth::register_user(&store, username, password).await?;
        println!("created user {} (id {})", user.username, user.id);
    } else {
        auth::change_password(&store, username, password).await?;
        println!("password updated for {username}");
    }

    store.close().await;
    Ok(())
}

async fn serve(config_path: Option<&std::path::Path>) -> netronome::Result<()> {
    let config = Config::load(config_path)?;
    ensure_config_dir(&config)?;

    let store = Store::open(&config.database_url()).await?;
    let broadcaster = Arc::new(Broadcaster::new());

    let notifier = Arc::new(Notifier::new(store.clone())?);
    let seeded = notifier.seed_events().await?;
    if seeded > 0 {
        tracing::info!(seeded, "notification events seeded");
    }

    let phase_budget = Duration::from_secs(config.speedtest.timeout_s.max(1));
    let runners: Vec<Arc<dyn Runner>> = vec![
        Arc::new(HostedRunner::new(phase_budget)?),
        Arc::new(IperfRunner::new(
            store.clone(),
            config.speedtest.iperf.clone(),
        )),
        Arc::new(LibrespeedRunner::new(Config::config_dir(), phase_budget)),
    ];
    let engine = Arc::new(ProbeEngine::new(
        store.clone(),
        broadcaster.clone(),
        notifier.clone(),
        runners,
    ));

    let supervisor = Arc::new(Supervisor::new(
        store.clone(),
        broadcaster.clone(),
        notifier.clone(),
        config.speedtest.packetloss.max_concurrent,
        config.speedtest.packetloss.privileged,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Scheduler::new(
        store.clone(),
        engine.clone(),
        supervisor.clone(),
        shutdown_rx.clone(),
    );
    scheduler.normalize_startup().await?;
    let scheduler_handle = tokio::spawn(scheduler.run());

    let pool = Arc::new(AgentPool::new(
        store.clone(),
        broadcaster.clone(),
        notifier.clone(),
        config.monitor.reconnect_interval,
    )?);
    if config.monitor.enabled {
        pool.start().await?;
    } else {
        tracing::info!("agent monitoring disabled by configuration");
    }

    let state = AppState {
        config: Arc::new(config),
        store: store.clone(),
        broadcaster,
        engine,
        supervisor: supervisor.clone(),
        pool: pool.clone(),
    };
    let server = tokio::spawn(http::serve(state, shutdown_rx));

    wait_for_shutdown_signal().await;
    tracing::info!("shutting down");

    let _ = shutdown_tx.send(true);
    supervisor.stop_all().await;
    pool.stop_all().await;
    let _ = scheduler_handle.await;
    match server.await {
        Ok(result) => result?,
        Err(err) => tracing::error!(%err, "http server task panicked"),
    }
    store.close().await;

    Ok(())
}

fn ensure_config_dir(config: &Config) -> netronome::Result<()> {
    let dir = Config::config_dir();
    std::fs::create_dir_all(&dir)
        .map_err(|e| Error::Internal(format!("create {}: {e}", dir.display())))?;
    if let Some(parent) = config.database_path().parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::Internal(format!("create {}: {e}", parent.display())))?;
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(err) => {
                tracing::error!(%err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
