mod logging;
mod routes;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use spigot_core::scrollback::DEFAULT_SCROLLBACK_CAPACITY;
use spigot_core::worker::DEFAULT_COMMAND;
use spigot_core::{Monitor, MonitorConfig, Supervisor, SupervisorConfig};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};
use tracing::{error, info, warn};

const DEFAULT_ADDR: &str = "0.0.0.0:25564";
const DEFAULT_SERVER_DIR: &str = "spigot";
const DEFAULT_LOG_DIR: &str = "logs";

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    server_dir: PathBuf,
    log_dir: String,
    scrollback: usize,
    auto_restart: bool,
    quit_timeout: Duration,
    debug: bool,
    command: Vec<String>,
}

#[derive(Parser, Debug)]
#[command(name = "spigot-monitor")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value = "")]
    server_dir: String,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = DEFAULT_SCROLLBACK_CAPACITY)]
    scrollback: usize,
    /// on|off; falls back to SMON_AUTO_RESTART, then on.
    #[arg(long, default_value = "")]
    auto_restart: String,
    #[arg(long, default_value_t = 30)]
    quit_timeout: u64,
    #[arg(long, default_value_t = false)]
    debug: bool,
    /// Server command line, e.g. `-- java -Xmx2G -jar spigot.jar nogui`.
    #[arg(last = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = load_config();
    if let Some(path) = logging::init(config.debug, &config.log_dir) {
        info!(event = "log_file", path = %path.display());
    }
    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(event = "monitor_error", error = ?err);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    ensure_server_dir(&config.server_dir)?;
    let addr: SocketAddr = config
        .addr
        .parse()
        .with_context(|| format!("invalid listen address {}", config.addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot listen on {addr}"))?;

    let (monitor, outbound) = Monitor::new(MonitorConfig {
        scrollback_capacity: config.scrollback,
        quit_timeout: config.quit_timeout,
    });
    let supervisor = Supervisor::new(
        SupervisorConfig {
            command: config.command.clone(),
            working_dir: Some(config.server_dir.clone()),
            auto_restart: config.auto_restart,
            ..SupervisorConfig::default()
        },
        monitor.clone(),
        outbound,
    );
    let supervisor_task = tokio::spawn(supervisor.run());

    info!(
        event = "monitor_start",
        addr = %config.addr,
        server_dir = %config.server_dir.display(),
        command = %config.command.join(" "),
        auto_restart = config.auto_restart
    );

    let shutdown = {
        let monitor = monitor.clone();
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!(event = "ctrl_c");
                    quit_all(&monitor).await;
                }
                _ = monitor.wait_for_shutdown() => {}
            }
        }
    };

    if let Err(err) = axum::serve(listener, routes::router(monitor.clone()))
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(event = "http_error", error = %err);
        quit_all(&monitor).await;
    }

    match supervisor_task.await {
        Ok(Ok(())) => {
            info!(event = "monitor_stop");
            Ok(())
        }
        Ok(Err(err)) => Err(anyhow::Error::new(err).context("server supervisor stopped")),
        Err(err) => Err(anyhow!("supervisor task failed: {err}")),
    }
}

async fn quit_all(monitor: &Arc<Monitor>) {
    if monitor.is_shutting_down() {
        return;
    }
    if let Err(err) = monitor.submit_command("quit-all").await {
        warn!(event = "quit_all_failed", error = %err);
    }
}

/// A missing server directory is created for the operator to fill in, and
/// startup is refused.
fn ensure_server_dir(dir: &Path) -> anyhow::Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create server directory {}", dir.display()))?;
    bail!(
        "server directory {} was missing and has been created; put the server jar there and start again",
        dir.display()
    )
}

fn load_config() -> Config {
    let args = Args::parse();
    let debug = args.debug || env_true("SMON_DEBUG");
    let command = if args.command.is_empty() {
        DEFAULT_COMMAND.iter().map(|arg| arg.to_string()).collect()
    } else {
        args.command
    };
    Config {
        addr: resolve_value(&args.addr, "SMON_ADDR", DEFAULT_ADDR),
        server_dir: PathBuf::from(resolve_value(
            &args.server_dir,
            "SMON_SERVER_DIR",
            DEFAULT_SERVER_DIR,
        )),
        log_dir: resolve_value(&args.log_dir, "SMON_LOG_DIR", DEFAULT_LOG_DIR),
        scrollback: args.scrollback,
        auto_restart: resolve_auto_restart(&args.auto_restart),
        quit_timeout: Duration::from_secs(args.quit_timeout),
        debug,
        command,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => parse_bool(&value).unwrap_or(false),
        Err(_) => false,
    }
}

fn resolve_value(flag: &str, env_key: &str, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = std::env::var(env_key) {
        if !value.trim().is_empty() {
            return value;
        }
    }
    default.to_string()
}

fn resolve_auto_restart(flag: &str) -> bool {
    if let Some(value) = parse_bool(flag) {
        return value;
    }
    if !flag.trim().is_empty() {
        eprintln!("ignoring --auto-restart {flag:?}; expected on or off");
    }
    std::env::var("SMON_AUTO_RESTART")
        .ok()
        .and_then(|value| parse_bool(&value))
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for value in ["1", "true", "YES", " on "] {
            assert_eq!(parse_bool(value), Some(true), "{value}");
        }
        for value in ["0", "False", "no", "off"] {
            assert_eq!(parse_bool(value), Some(false), "{value}");
        }
        assert_eq!(parse_bool(""), None);
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn explicit_flags_win() {
        let unset = "SMON_TEST_UNSET_ADDR";
        assert_eq!(
            resolve_value("127.0.0.1:9000", unset, DEFAULT_ADDR),
            "127.0.0.1:9000"
        );
        assert_eq!(resolve_value("", unset, DEFAULT_ADDR), DEFAULT_ADDR);
        assert!(!resolve_auto_restart("off"));
        assert!(resolve_auto_restart("on"));
    }

    #[test]
    fn missing_server_dir_is_created_and_refused() {
        let root = tempfile::tempdir().expect("tempdir");
        let dir = root.path().join("spigot");
        let err = ensure_server_dir(&dir).expect_err("missing dir refused");
        assert!(err.to_string().contains("has been created"));
        assert!(dir.is_dir());
        assert!(ensure_server_dir(&dir).is_ok());
    }
}
