pub mod api;
pub mod config;
pub mod context;
pub mod errors;
pub mod gateway;
pub mod live;
pub mod models;
pub mod notify;
pub mod redaction;
pub mod session;
pub mod store;
pub mod validation;

pub use crate::config::ClientConfig;
pub use crate::context::ConsoleContext;
pub use crate::errors::{AppError, AppResult};
pub use crate::live::{LiveChannel, LiveSignal, LiveTransport, MemoryTransport};
pub use crate::notify::{ChannelNotifier, Notice, NoticeLevel, Notifier, TracingNotifier};
pub use crate::session::{SessionManager, StaticTokenSource, TokenSource};
pub use crate::store::{LoadStatus, StoreSnapshot, WorkspaceStore};

use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. `RUST_LOG` wins over the configured filter.
/// With `logDir` set, JSON lines go to a daily rolling `console.log` there;
/// otherwise plain text goes to stderr.
pub fn init_tracing(config: &ClientConfig) -> AppResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)?;
            let file_appender = tracing_appender::rolling::daily(log_dir, "console.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = LOG_GUARD.set(guard);

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_writer(non_blocking)
                .try_init()
                .map_err(|error| AppError::Internal(error.to_string()))
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|error| AppError::Internal(error.to_string())),
    }
}
