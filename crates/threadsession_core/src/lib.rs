//! Per-thread persistence session management.
//! This crate owns the lifecycle of one session factory per persistence unit
//! and a per-thread cache of sessions created from it, so server-style code
//! can reach its session without passing handles through call stacks.

pub mod access;
pub mod engine;
pub mod logging;
pub mod properties;
pub mod registry;
pub mod with_session;

pub use access::{AccessError, AccessResult, PerThreadSessionAccess};
pub use engine::sqlite::{SqliteEngine, SqliteSession};
pub use engine::{EngineError, EngineResult, PersistenceEngine, Session, SessionFactory};
pub use logging::{default_log_level, init_logging, logging_status};
pub use properties::UnitProperties;
pub use with_session::WithPerThreadSession;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
