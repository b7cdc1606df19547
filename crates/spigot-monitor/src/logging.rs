use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_NAME: &str = "spigot-monitor.log";
/// A previous run's log larger than this is moved to `spigot-monitor.log.1`.
const ROTATE_BYTES: u64 = 8 * 1024 * 1024;

/// Installs the global subscriber: ANSI output on stdout plus a plain-text
/// copy appended to `<log_dir>/spigot-monitor.log`. Returns the log file in
/// use, if any.
pub fn init(debug: bool, log_dir: &str) -> Option<PathBuf> {
    let file = match open_log_file(log_dir, ROTATE_BYTES) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            None
        }
    };
    let path = file.as_ref().map(|(path, _)| path.clone());
    let file_layer = file.map(|(_, file)| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });

    let installed = tracing_subscriber::registry()
        .with(level_filter(debug))
        .with(fmt::layer())
        .with(file_layer)
        .try_init();
    if installed.is_err() {
        return None;
    }
    path
}

/// `--debug` wins, then `RUST_LOG`, then `SMON_LOG_LEVEL`, then `info`.
fn level_filter(debug: bool) -> EnvFilter {
    if debug {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("SMON_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(level)
    })
}

fn open_log_file(log_dir: &str, rotate_bytes: u64) -> io::Result<Option<(PathBuf, File)>> {
    if log_dir.trim().is_empty() {
        return Ok(None);
    }
    let dir = Path::new(log_dir);
    fs::create_dir_all(dir)?;
    let path = dir.join(LOG_FILE_NAME);
    rotate_if_large(&path, rotate_bytes)?;
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok(Some((path, file)))
}

fn rotate_if_large(path: &Path, limit: u64) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > limit => {
            fs::rename(path, path.with_extension("log.1"))?;
            Ok(true)
        }
        Ok(_) => Ok(false),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}
