// src/utils/logging.rs
//! Logging configuration and utilities
//!
//! Logging setup for the miner, built on `env_logger` with a compact
//! custom format. Two entry points exist: the standard one used by the
//! `start` subcommand and a more verbose benchmark variant.

use env_logger::{Builder, Target};
use log::LevelFilter;
use std::env;

/// Initializes the logging subsystem with sensible defaults
///
/// Logs to stdout at `Info` unless overridden through `RUST_LOG`.
pub fn init_logging() {
    common_log_config().filter(None, LevelFilter::Info).init();
}

/// Configures benchmark-specific logging
///
/// Defaults to `Debug` when `RUST_LOG` is not set, so per-device switch
/// and epoch timings show up without extra flags.
pub fn init_bench_logging() {
    let mut builder = common_log_config();

    if env::var("RUST_LOG").is_err() {
        builder.filter_level(LevelFilter::Debug);
    } else {
        builder.parse_env("RUST_LOG");
    }

    builder.init();
}

/// Creates a base logger builder with the shared format
///
/// Format: `[<epoch seconds> <level> <module>] <message>`, written to
/// stdout.
fn common_log_config() -> Builder {
    let mut builder = Builder::new();

    builder
        .format(|buf, record| {
            use std::io::Write;
            let ts = buf.timestamp_seconds();
            let level = record.level();
            let module = record.module_path().unwrap_or_default();

            writeln!(buf, "[{} {} {}] {}", ts, level, module, record.args())
        })
        .target(Target::Stdout);

    builder
}
