use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_DIR: &str = "./logs";

/// Console plus daily-rotated JSON file under `./logs`. Level comes from `RUST_LOG`, default info.
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let file_layer = match std::fs::create_dir_all(LOG_DIR) {
        Ok(()) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, "dispersion-monitor.log");
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(appender)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_ansi(false)
                    .json(),
            )
        }
        Err(e) => {
            eprintln!("Could not create {LOG_DIR}, logging to console only: {e}");
            None
        }
    };

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_ansi(true),
        )
        .with(file_layer)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}
