use std::path::Path;

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, fmt::time::UtcTime, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::error::{AppError, AppResult};

// Holding the guard keeps the background file writer alive for the process.
static FILE_WRITER_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

const DEFAULT_LOG_DIRECTIVES: &str =
    "info,app::detector=debug,app::resolution=debug,app::audit=info,app::db=info";
const LOG_FILE_PREFIX: &str = "schedule-guard.log";

/// Installs the global subscriber: a daily rolling file under `log_dir` and
/// a stderr layer, both filtered by `RUST_LOG` when set. Only the first call
/// does anything.
pub fn init_logging(log_dir: &Path) -> AppResult<()> {
    FILE_WRITER_GUARD
        .get_or_try_init(|| {
            std::fs::create_dir_all(log_dir)?;
            let (file_writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX));

            tracing_subscriber::registry()
                .with(env_filter()?)
                .with(
                    fmt::layer()
                        .with_writer(file_writer)
                        .with_ansi(false)
                        .with_timer(UtcTime::rfc_3339()),
                )
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(false)
                        .with_timer(UtcTime::rfc_3339()),
                )
                .try_init()
                .map_err(|err| AppError::other(format!("failed to install subscriber: {err}")))?;

            Ok(guard)
        })
        .map(|_| ())
}

fn env_filter() -> AppResult<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_DIRECTIVES))
        .map_err(|err| AppError::other(format!("invalid log directives: {err}")))
}
