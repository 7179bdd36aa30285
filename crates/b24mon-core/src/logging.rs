use std::{fs, path::Path};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{errors::Error, Result};

/// Initialize tracing for a binary.
///
/// Console output goes to stderr. When `log_file` is set, the same events are
/// appended (without ANSI colors) to that file; keep the returned guard alive
/// for the lifetime of the process or buffered lines are lost on exit.
///
/// `RUST_LOG` wins over `level` when both are set.
pub fn init(service_name: &str, level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(service_name, level)));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(true),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::External(format!("failed to install tracing subscriber: {e}")))?;

    Ok(guard)
}

fn file_writer(path: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| Error::storage(dir, e))?;

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Config(format!("LOG_FILE has no file name: {}", path.display())))?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

/// Map a Python-style level name (`INFO`, `WARNING`, ...) to filter directives.
///
/// Chatty HTTP dependencies stay at `warn` unless explicitly raised through `RUST_LOG`.
fn default_directives(service_name: &str, level: &str) -> String {
    let level = match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "critical" | "fatal" => "error",
        _ => "info",
    };
    let service = service_name.replace('-', "_");
    format!("{level},{service}={level},hyper=warn,reqwest=warn,teloxide=warn,html5ever=warn,selectors=warn")
}
