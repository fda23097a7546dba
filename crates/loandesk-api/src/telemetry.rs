//! Tracing subscriber setup for the API binary.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RUST_LOG` | `loandesk_api=debug,loandesk_jobs=debug,tower_http=debug` | Env filter |
//! | `LOG_FORMAT` | `text` | `text` or `json` |
//! | `LOG_FILE` | unset | Write to a daily-rolled file instead of stdout |
//! | `LOG_ANSI` | auto (off for files) | Force ANSI colors on or off |

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

pub const DEFAULT_FILTER: &str = "loandesk_api=debug,loandesk_jobs=debug,tower_http=debug";

const DEFAULT_LOG_FILE_NAME: &str = "loandesk-api.log";

type FilteredRegistry = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub format: LogFormat,
    pub file: Option<PathBuf>,
    pub ansi: Option<bool>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let format = match get("LOG_FORMAT").as_deref().map(str::trim) {
            Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        let file = get("LOG_FILE")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        let ansi = get("LOG_ANSI").map(|v| v == "true" || v == "1");

        Self { format, file, ansi }
    }

    pub fn format_name(&self) -> &'static str {
        match self.format {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        }
    }
}

fn fmt_layer<W>(format: LogFormat, ansi: Option<bool>, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        LogFormat::Text => {
            let layer = fmt::layer().with_writer(writer);
            match ansi {
                Some(ansi) => layer.with_ansi(ansi).boxed(),
                None => layer.boxed(),
            }
        }
    }
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process when logging to a file.
pub fn init_tracing(settings: &LogSettings) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (layer, guard) = match &settings.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .and_then(|f| f.to_str())
                .unwrap_or(DEFAULT_LOG_FILE_NAME);
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
            let ansi = Some(settings.ansi.unwrap_or(false));
            (fmt_layer(settings.format, ansi, writer), Some(guard))
        }
        None => (fmt_layer(settings.format, settings.ansi, std::io::stdout), None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .init();
    guard
}
