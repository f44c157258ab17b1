use std::{
    fs::File,
    path::{Path, PathBuf},
};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub enum TraceSink {
    File { path: PathBuf },
    Stdout,
    Disabled,
}

pub struct TraceOptions {
    pub sink: TraceSink,
    pub env_filter: String,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            sink: TraceSink::Stdout,
            env_filter: "braid=trace".to_string(),
        }
    }
}

/// Keep this alive for as long as events should be captured; dropping it
/// flushes the file sink.
pub struct TraceSession {
    guard: Option<WorkerGuard>,
}

pub fn init(options: TraceOptions) -> TraceSession {
    let filter = EnvFilter::builder()
        .parse(options.env_filter)
        .expect("Invalid tracing env filter");

    match options.sink {
        TraceSink::File { path } => init_file(&filter, path),
        TraceSink::Stdout => init_stdout(&filter),
        TraceSink::Disabled => {
            tracing_subscriber::registry().with(filter).init();
            TraceSession { guard: None }
        }
    }
}

fn init_file(filter: &EnvFilter, path: PathBuf) -> TraceSession {
    let file = File::create(&path).expect("Failed to create trace file");
    let (writer, guard) = tracing_appender::non_blocking(file);
    tracing_subscriber::registry()
        .with(filter.clone())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
        .init();
    TraceSession { guard: Some(guard) }
}

fn init_stdout(filter: &EnvFilter) -> TraceSession {
    tracing_subscriber::registry()
        .with(filter.clone())
        .with(tracing_subscriber::fmt::layer())
        .init();
    TraceSession { guard: None }
}

pub fn trace_file_path(path: impl AsRef<Path>) -> TraceSink {
    TraceSink::File {
        path: path.as_ref().to_path_buf(),
    }
}
