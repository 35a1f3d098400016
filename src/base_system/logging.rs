use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::{self, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("subscriber init failed: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone, Copy, Debug)]
pub struct LogOptions {
    pub debug: bool,
    pub use_color: bool,
    pub console: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            debug: false,
            use_color: true,
            console: false,
        }
    }
}

/// 日志系统句柄；丢弃后文件 writer 会被冲刷。
pub struct LogSystem {
    _guard: WorkerGuard,
}

impl LogSystem {
    pub fn init_with_base(options: LogOptions, base_dir: Option<&Path>) -> Result<Self, LogError> {
        let logs_dir = base_dir
            .map(|base| base.join("logs"))
            .unwrap_or_else(|| PathBuf::from("logs"));
        fs::create_dir_all(&logs_dir)?;

        let file_appender = rolling::never(&logs_dir, "latest.log");
        let (file_writer, guard) = non_blocking::NonBlockingBuilder::default()
            .lossy(false)
            .finish(file_appender);

        let level = if options.debug {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };

        let file_layer = fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_target(true)
            .with_filter(level);

        if options.console {
            let console_layer = fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(options.use_color)
                .with_target(false)
                .with_filter(level);
            tracing_subscriber::registry()
                .with(file_layer)
                .with(console_layer)
                .try_init()?;
        } else {
            tracing_subscriber::registry().with(file_layer).try_init()?;
        }

        Ok(Self { _guard: guard })
    }
}
