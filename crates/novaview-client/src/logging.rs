use anyhow::Context;
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Keeps the non-blocking file writer alive; drop flushes it.
pub struct LoggingGuards {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub debug: bool,
    pub log_dir: Option<PathBuf>,
    pub log_file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            debug: false,
            log_dir: None,
            log_file_prefix: "novaview".to_string(),
        }
    }
}

fn filter(debug: bool) -> EnvFilter {
    match std::env::var("RUST_LOG") {
        Ok(v) => EnvFilter::new(v),
        Err(_) if debug => EnvFilter::new("info,novaview_client=debug,novaview_core=debug"),
        Err(_) => EnvFilter::new("info"),
    }
}

pub fn init(cfg: &LoggingConfig) -> anyhow::Result<LoggingGuards> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);

    let mut file_guard = None;
    let file_layer = match &cfg.log_dir {
        None => None,
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, &cfg.log_file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            file_guard = Some(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed(),
            )
        }
    };

    tracing_subscriber::registry()
        .with(filter(cfg.debug))
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("init tracing: {e}"))?;

    std::panic::set_hook(Box::new(|panic_info| {
        tracing::error!(panic = %panic_info, "panic");
    }));

    Ok(LoggingGuards {
        _file_guard: file_guard,
    })
}
