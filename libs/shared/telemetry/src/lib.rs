// [libs/shared/telemetry/src/lib.rs]
//! Shared tracing setup for the three OctoLab binaries. One call at the
//! top of `main` gets a process structured logs, an env-driven filter,
//! and a panic hook that routes through `tracing::error!` instead of
//! stderr so a worker-task panic shows up correlated with its lab id.

use std::panic;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber for `service_name`.
///
/// Development builds get compact, colorized output; production
/// (`OCTOLAB_ENV=production`, or any release build) gets flattened JSON
/// suitable for a log pipeline. `RUST_LOG` overrides the default filter.
pub fn init_tracing(service_name: &str) {
    let default_directive = if cfg!(debug_assertions) { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("{service_name}={default_directive},tower_http=warn,hyper=warn,libsql=warn").into()
    });

    let is_production = std::env::var("OCTOLAB_ENV").as_deref() == Ok("production") || !cfg!(debug_assertions);

    if is_production {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_target(false))
            .init();
    }

    install_panic_hook(service_name);
}

fn install_panic_hook(service_name: &str) {
    let service_name = service_name.to_string();
    panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<no panic message>");
        tracing::error!(target: "panic", service = %service_name, location = %location, "worker thread panicked: {payload}");
    }));
}
