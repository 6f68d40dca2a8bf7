//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `storekit_core` linkage.
//! - Validate a router configuration file and print a redacted summary.
//!
//! Usage: `storekit_cli [config.json]`. Set `STOREKIT_LOG_DIR` to an absolute
//! directory to also write core log events there.

use log::{error, info};
use serde_json::json;
use std::process::ExitCode;
use storekit_core::{default_log_level, flush_logs, init_logging, RouterConfig};

fn main() -> ExitCode {
    let code = run();
    flush_logs();
    code
}

fn run() -> ExitCode {
    println!("storekit_core version={}", storekit_core::core_version());

    if let Ok(log_dir) = std::env::var("STOREKIT_LOG_DIR") {
        if let Err(err) = init_logging(default_log_level(), &log_dir) {
            eprintln!("logging disabled: {err}");
        }
    }

    let Some(path) = std::env::args().nth(1) else {
        return ExitCode::SUCCESS;
    };

    let config = match RouterConfig::load(&path) {
        Ok(config) => config,
        Err(err) => {
            error!("event=config_load module=cli status=error path={path} error={err}");
            eprintln!("invalid config: {err}");
            return ExitCode::FAILURE;
        }
    };

    let bindings: Vec<_> = config
        .bindings
        .iter()
        .map(|binding| {
            json!({
                "backend": binding.backend,
                "marker": binding.marker,
                "entities": binding.entities,
                "primary": binding.primary.redacted(),
                "replicas": binding.replicas.len(),
                "create_schema_if_missing": binding.create_schema_if_missing,
            })
        })
        .collect();
    info!(
        "event=config_load module=cli status=ok path={} bindings={}",
        path,
        bindings.len()
    );

    match serde_json::to_string_pretty(&json!({ "bindings": bindings })) {
        Ok(summary) => {
            println!("{summary}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("cannot render summary: {err}");
            ExitCode::FAILURE
        }
    }
}
