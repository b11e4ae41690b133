//! Process-wide tracing setup. Call `init` once, before the session is built.

use cfg_if::cfg_if;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info";

/// Log file used when `RUST_LOG_FILE` is unset
pub const DEFAULT_LOG_FILE: &str = "logs/starframe.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

cfg_if! {
    if #[cfg(target_arch = "wasm32")] {
        pub fn init() {
            let wasm_layer = tracing_wasm::WASMLayer::new(tracing_wasm::WASMLayerConfig::default());
            let _ = tracing_subscriber::registry()
                .with(env_filter())
                .with(wasm_layer)
                .try_init();

            #[cfg(feature = "console_error_panic_hook")]
            console_error_panic_hook::set_once();
        }
    } else {
        use std::ffi::OsStr;
        use std::io;
        use std::path::{Path, PathBuf};

        use once_cell::sync::OnceCell;
        use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
        use tracing_subscriber::fmt;

        // keeps the file writer flushing until exit
        static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

        fn log_file_path() -> PathBuf {
            std::env::var_os("RUST_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE))
        }

        fn file_writer(path: &Path) -> NonBlocking {
            let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().unwrap_or(OsStr::new("starframe.log"));
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
            let _ = FILE_GUARD.set(guard);
            writer
        }

        fn install_panic_hook() {
            std::panic::set_hook(Box::new(|info| {
                let payload = info
                    .payload()
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| info.payload().downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "<non-string panic>".to_string());
                let location = info
                    .location()
                    .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
                    .unwrap_or_default();
                let backtrace = std::backtrace::Backtrace::force_capture();
                tracing::error!(%location, %payload, "panic\n{backtrace}");
            }));
        }

        /// Console on stderr plus a daily-rolling log file. A second call is a
        /// no-op, so tests and restarts can call it freely.
        pub fn init() {
            let console = fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .compact();

            let file = fmt::layer()
                .with_writer(file_writer(&log_file_path()))
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .compact();

            let installed = tracing_subscriber::registry()
                .with(env_filter())
                .with(console)
                .with(file)
                .try_init();
            if installed.is_err() {
                tracing::debug!("logging already initialised");
                return;
            }

            install_panic_hook();
        }
    }
}
