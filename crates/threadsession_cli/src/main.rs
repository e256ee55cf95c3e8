//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `threadsession_core` linkage.
//! - Keep output deterministic for quick local sanity checks.

use std::process::ExitCode;
use std::sync::Arc;
use threadsession_core::{PerThreadSessionAccess, Session as _, SqliteEngine};

fn main() -> ExitCode {
    println!(
        "threadsession_core version={}",
        threadsession_core::core_version()
    );

    let access = PerThreadSessionAccess::new("cli-smoke", Arc::new(SqliteEngine::new()));
    let session = match access.get() {
        Ok(session) => session,
        Err(err) => {
            eprintln!("cli-smoke session error: {err}");
            return ExitCode::FAILURE;
        }
    };
    println!(
        "cli-smoke session_id={} open={}",
        session.session_id(),
        session.is_open()
    );

    if let Err(err) = access.shutdown() {
        eprintln!("cli-smoke shutdown error: {err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
