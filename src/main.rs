mod cli;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use linkwatchd::action::{Launcher, ShellLauncher};
use linkwatchd::config::{self, ConfigStore};
use linkwatchd::console;
use linkwatchd::event_log::{DailyFileLog, EventLog};
use linkwatchd::presenter::PresenterHandle;
use linkwatchd::probe::{Prober, SystemPinger};
use linkwatchd::watchdog::{Watchdog, apply_target_update};

/// Requests queued from the console before the watchdog picks them up.
const REQUEST_BOUND: usize = 16;

fn main() {
    // Initialize logger with custom format for daemon
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("FATAL: Failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };
    match rt.block_on(real_main()) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    }
}

async fn real_main() -> Result<i32> {
    let args = cli::Args::parse();

    match args.sub.unwrap_or(cli::Cmd::Run {
        config: cli::ConfigArgs::default(),
        log_dir: None,
        hidden: false,
        no_console: false,
    }) {
        cli::Cmd::Run {
            config,
            log_dir,
            hidden,
            no_console,
        } => run_watchdog(config, log_dir, hidden, no_console).await,
        cli::Cmd::Probe { address, timeout } => handle_probe(&address, timeout).await,
        cli::Cmd::SetTarget { address, config } => handle_set_target(&address, config).await,
        cli::Cmd::Trigger { yes, config } => handle_trigger(yes, config).await,
        cli::Cmd::ShowConfig { config } => handle_show_config(config),
    }
}

fn load_store(args: cli::ConfigArgs) -> Result<ConfigStore> {
    let cfg_path = config::resolve_path(args.config, args.system)?;
    let store = ConfigStore::load_or_create(&cfg_path).context("Failed to load config")?;
    info!("Using config from: {}", cfg_path.display());
    Ok(store)
}

async fn run_watchdog(
    config_args: cli::ConfigArgs,
    log_dir: Option<PathBuf>,
    hidden: bool,
    no_console: bool,
) -> Result<i32> {
    let store = Arc::new(load_store(config_args)?);
    let log_dir = log_dir.unwrap_or_else(|| config::default_log_dir(store.path()));
    let file_log = Arc::new(
        DailyFileLog::start(&log_dir).context("Failed to start event log writer")?,
    );
    let events: Arc<dyn EventLog> = file_log.clone();
    events.log(&format!("linkwatchd started (pid {})", std::process::id()));

    let (presenter, notifications) = PresenterHandle::channel();
    let _console = console::spawn_presenter(notifications, !hidden)
        .context("Failed to start console presenter")?;

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let (requests_tx, requests_rx) = mpsc::channel(REQUEST_BOUND);
    if !no_console {
        console::spawn_command_reader(presenter.clone(), requests_tx, shutdown.clone())
            .context("Failed to start console input")?;
    }

    let watchdog = Watchdog::new(
        store,
        Arc::new(SystemPinger::new()),
        Arc::new(ShellLauncher),
        Arc::new(presenter),
        Arc::clone(&events),
    );
    watchdog.run(shutdown, requests_rx).await;

    events.log("linkwatchd exiting");
    // Detached tasks may still hold the log; process::exit skips their drops.
    file_log.close();
    Ok(0)
}

fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("signal received – orderly shutdown");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {e}");
            return ctrl_c().await;
        }
    };
    tokio::select! {
        _ = ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

/// Handle probe command - one reachability check
async fn handle_probe(address: &str, timeout: u64) -> Result<i32> {
    let pinger = SystemPinger::new();
    if pinger.probe(address, Duration::from_secs(timeout.max(1))).await {
        println!("{address} is reachable");
        Ok(0)
    } else {
        println!("{address} is unreachable");
        Ok(1)
    }
}

/// Handle set-target command - test the address, then save it
async fn handle_set_target(address: &str, config_args: cli::ConfigArgs) -> Result<i32> {
    let store = load_store(config_args)?;
    let update = apply_target_update(&store, &SystemPinger::new(), address).await;
    update
        .saved
        .with_context(|| format!("Failed to save target {}", address.trim()))?;
    if update.reachable {
        println!("test passed, target saved: {}", address.trim());
    } else {
        println!(
            "target saved, but {} does not answer right now",
            address.trim()
        );
    }
    Ok(0)
}

/// Handle trigger command - run the configured action and wait for it
async fn handle_trigger(confirmed: bool, config_args: cli::ConfigArgs) -> Result<i32> {
    let store = load_store(config_args)?;
    let command = store.snapshot().action_command;
    let command = command.trim();
    if command.is_empty() {
        println!("no action command configured, nothing to run");
        return Ok(1);
    }
    if !confirmed {
        anyhow::bail!("refusing to run `{command}` without --yes");
    }

    info!("running action: {command}");
    let completion = ShellLauncher
        .launch(command)
        .with_context(|| format!("Failed to launch `{command}`"))?;
    completion.await?;
    println!("action completed");
    Ok(0)
}

/// Handle show-config command - print the effective configuration
fn handle_show_config(config_args: cli::ConfigArgs) -> Result<i32> {
    let store = load_store(config_args)?;
    print!("{}", config::render(&store.snapshot())?);
    Ok(0)
}
