//! Persistence-engine collaborator contracts.
//!
//! # Responsibility
//! - Define the seam through which session factories and sessions are
//!   produced, inspected, and closed.
//! - Keep the core lifecycle logic independent of any concrete engine.
//!
//! # Invariants
//! - Factories are shared across threads; sessions are owned by exactly one
//!   thread and are deliberately not `Send`.
//! - Engine failures propagate verbatim; the core never translates or
//!   suppresses them.

use crate::properties::UnitProperties;
use std::any::Any;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

pub mod sqlite;

pub type EngineResult<T> = Result<T, EngineError>;

/// Failures raised by a persistence engine collaborator.
#[derive(Debug)]
pub enum EngineError {
    UnknownUnit(String),
    InvalidProperty { name: String, message: String },
    FactoryClosed(String),
    SessionClosed(Uuid),
    Sqlite(rusqlite::Error),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownUnit(unit_name) => {
                write!(f, "persistence unit is unknown to the engine: `{unit_name}`")
            }
            Self::InvalidProperty { name, message } => {
                write!(f, "invalid engine property `{name}`: {message}")
            }
            Self::FactoryClosed(unit_name) => {
                write!(f, "session factory for `{unit_name}` is closed")
            }
            Self::SessionClosed(session_id) => {
                write!(f, "session {session_id} is closed")
            }
            Self::Sqlite(err) => write!(f, "{err}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Entry point of an engine: builds one session factory per persistence unit.
///
/// Fails when the unit name is unknown to the engine or a property value is
/// invalid.
pub trait PersistenceEngine: Send + Sync {
    fn create_factory(
        &self,
        unit_name: &str,
        properties: &UnitProperties,
    ) -> EngineResult<Arc<dyn SessionFactory>>;
}

/// Process-wide factory producing sessions for one persistence unit.
///
/// Lifecycle moves only forward: open on creation, closed forever after
/// `close`.
pub trait SessionFactory: Send + Sync + std::fmt::Debug {
    fn unit_name(&self) -> &str;
    fn is_open(&self) -> bool;
    fn close(&self) -> EngineResult<()>;
    /// Fails with [`EngineError::FactoryClosed`] once the factory is closed.
    fn create_session(&self) -> EngineResult<Rc<dyn Session>>;
}

/// One thread-owned unit-of-work handle into the engine.
///
/// A session may be closed by the engine outside this crate's control;
/// callers holding a closed session get a fresh one from the next
/// `PerThreadSessionAccess::get`.
pub trait Session: std::fmt::Debug {
    fn session_id(&self) -> Uuid;
    fn is_open(&self) -> bool;
    fn close(&self) -> EngineResult<()>;
    /// Access to the concrete session type, e.g. to run engine-specific
    /// statements.
    fn as_any(&self) -> &dyn Any;
}

#[cfg(test)]
mod tests {
    use super::EngineError;
    use std::error::Error;

    #[test]
    fn formats_sequencing_relevant_errors() {
        let err = EngineError::UnknownUnit("orders".to_string());
        assert!(err.to_string().contains("orders"));

        let err = EngineError::InvalidProperty {
            name: "mode".to_string(),
            message: "expected memory|file".to_string(),
        };
        assert!(err.to_string().contains("mode"));
        assert!(err.to_string().contains("expected memory|file"));

        let err = EngineError::FactoryClosed("orders".to_string());
        assert!(err.to_string().contains("closed"));
    }

    #[test]
    fn sqlite_errors_keep_their_source() {
        let err = EngineError::from(rusqlite::Error::InvalidQuery);
        assert!(err.source().is_some());
    }
}
