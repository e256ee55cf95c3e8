//! Per-unit factory lifecycle and per-thread session cache.
//!
//! # Responsibility
//! - Own the configuration for one persistence unit and build its factory
//!   lazily, exactly once per unit name process-wide.
//! - Attach at most one live session to each calling thread, replacing
//!   sessions the engine closed behind our back.
//!
//! # Invariants
//! - `configure` is rejected once the unit's factory exists.
//! - No session is handed out while the factory is closed.
//! - Thread slots are only ever touched by their owning thread.

use crate::engine::{EngineError, PersistenceEngine, Session, SessionFactory};
use crate::properties::UnitProperties;
use crate::registry;
use log::{info, warn};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type AccessResult<T> = Result<T, AccessError>;

/// Lifecycle and collaborator errors raised by [`PerThreadSessionAccess`].
///
/// The first two variants are sequencing violations: programmer errors,
/// reported synchronously and never retried. `Engine` wraps collaborator
/// failures untranslated.
#[derive(Debug)]
pub enum AccessError {
    AlreadyInitialized { unit_name: String },
    Inactive { unit_name: String },
    Engine(EngineError),
}

impl Display for AccessError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyInitialized { unit_name } => write!(
                f,
                "persistence unit `{unit_name}` is already initialized; properties can no longer change"
            ),
            Self::Inactive { unit_name } => write!(
                f,
                "persistence unit `{unit_name}` is not active; sessions are unavailable after shutdown"
            ),
            Self::Engine(err) => write!(f, "{err}"),
        }
    }
}

impl Error for AccessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Engine(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EngineError> for AccessError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}

static NEXT_ACCESS_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    // Keyed by access id so two access objects on one thread never alias.
    static THREAD_SESSIONS: RefCell<BTreeMap<u64, Rc<dyn Session>>> =
        RefCell::new(BTreeMap::new());
}

/// Entry point of the crate: one factory per persistence unit, one cached
/// session per calling thread.
///
/// The access object is shared freely across threads (typically in an `Arc`);
/// the sessions it hands out are not, each belongs to the thread that called
/// [`get`](Self::get).
pub struct PerThreadSessionAccess {
    unit_name: String,
    engine: Arc<dyn PersistenceEngine>,
    properties: Mutex<UnitProperties>,
    access_id: u64,
}

impl PerThreadSessionAccess {
    pub fn new(unit_name: impl Into<String>, engine: Arc<dyn PersistenceEngine>) -> Self {
        Self {
            unit_name: unit_name.into(),
            engine,
            properties: Mutex::new(UnitProperties::new()),
            access_id: NEXT_ACCESS_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    /// Applies `mutator` to the unit properties.
    ///
    /// # Errors
    /// `AccessError::AlreadyInitialized` once the unit's factory exists; the
    /// properties are frozen from the first access operation onwards.
    pub fn configure(&self, mutator: impl FnOnce(&mut UnitProperties)) -> AccessResult<()> {
        if registry::contains(&self.unit_name) {
            warn!(
                "event=configure_rejected module=access status=error unit={} error_code=already_initialized",
                self.unit_name
            );
            return Err(AccessError::AlreadyInitialized {
                unit_name: self.unit_name.clone(),
            });
        }
        mutator(&mut self.lock_properties());
        Ok(())
    }

    /// Reports whether the unit's factory is open, creating it if needed.
    ///
    /// # Errors
    /// Engine failures from lazy factory creation.
    pub fn is_active(&self) -> AccessResult<bool> {
        Ok(self.factory()?.is_open())
    }

    /// Closes the unit's factory irrevocably, creating it first if needed.
    ///
    /// Calling this twice is accepted: the second call observes the closed
    /// factory and returns without touching the engine again.
    pub fn shutdown(&self) -> AccessResult<()> {
        let factory = self.factory()?;
        if factory.is_open() {
            factory.close().map_err(AccessError::Engine)?;
            info!(
                "event=access_shutdown module=access status=ok unit={}",
                self.unit_name
            );
        }
        Ok(())
    }

    /// Returns the calling thread's session, creating and attaching one when
    /// none is cached or the cached one was closed externally.
    ///
    /// # Errors
    /// `AccessError::Inactive` after shutdown; engine failures from factory
    /// or session creation.
    pub fn get(&self) -> AccessResult<Rc<dyn Session>> {
        let factory = self.require_active()?;
        THREAD_SESSIONS.with(|slots| {
            let mut slots = slots.borrow_mut();
            if let Some(session) = slots.get(&self.access_id) {
                if session.is_open() {
                    return Ok(Rc::clone(session));
                }
            }

            let reuse = if slots.contains_key(&self.access_id) {
                "stale"
            } else {
                "none"
            };
            let session = factory.create_session().map_err(AccessError::Engine)?;
            info!(
                "event=session_attach module=access status=ok unit={} session_id={} replaced={}",
                self.unit_name,
                session.session_id(),
                reuse
            );
            slots.insert(self.access_id, Rc::clone(&session));
            Ok(session)
        })
    }

    /// Reports whether the calling thread has a cached session. Does not
    /// check whether that session is still open.
    ///
    /// # Errors
    /// `AccessError::Inactive` after shutdown.
    pub fn is_attached(&self) -> AccessResult<bool> {
        self.require_active()?;
        Ok(THREAD_SESSIONS.with(|slots| slots.borrow().contains_key(&self.access_id)))
    }

    /// Closes and detaches the calling thread's session, if any.
    ///
    /// # Errors
    /// `AccessError::Inactive` after shutdown; engine failures from closing
    /// the session. The slot is cleared either way.
    pub fn dispose(&self) -> AccessResult<()> {
        self.require_active()?;
        let detached = THREAD_SESSIONS.with(|slots| slots.borrow_mut().remove(&self.access_id));
        if let Some(session) = detached {
            session.close().map_err(AccessError::Engine)?;
            info!(
                "event=session_dispose module=access status=ok unit={} session_id={}",
                self.unit_name,
                session.session_id()
            );
        }
        Ok(())
    }

    fn factory(&self) -> AccessResult<Arc<dyn SessionFactory>> {
        registry::get_or_create(&self.unit_name, || {
            let snapshot = self.lock_properties().clone();
            let factory = self.engine.create_factory(&self.unit_name, &snapshot)?;
            info!(
                "event=factory_init module=access status=ok unit={} property_count={}",
                self.unit_name,
                snapshot.len()
            );
            Ok(factory)
        })
        .map_err(AccessError::Engine)
    }

    fn require_active(&self) -> AccessResult<Arc<dyn SessionFactory>> {
        let factory = self.factory()?;
        if !factory.is_open() {
            return Err(AccessError::Inactive {
                unit_name: self.unit_name.clone(),
            });
        }
        Ok(factory)
    }

    fn lock_properties(&self) -> MutexGuard<'_, UnitProperties> {
        // The properties map stays valid if a configure closure panicked.
        self.properties.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessError, PerThreadSessionAccess};
    use crate::engine::sqlite::SqliteEngine;
    use std::sync::Arc;
    use uuid::Uuid;

    fn memory_access(prefix: &str) -> PerThreadSessionAccess {
        let unit = format!("{prefix}-{}", Uuid::new_v4());
        let access = PerThreadSessionAccess::new(unit, Arc::new(SqliteEngine::new()));
        access
            .configure(|props| {
                props.put("mode", "memory");
            })
            .expect("configure before first access");
        access
    }

    #[test]
    fn configure_is_rejected_after_first_access() {
        let access = memory_access("access-freeze");
        assert!(access.is_active().expect("lazy activation"));

        let err = access
            .configure(|props| {
                props.put("mode", "file");
            })
            .expect_err("configure after activation must fail");
        assert!(matches!(err, AccessError::AlreadyInitialized { .. }));
    }

    #[test]
    fn shutdown_is_idempotent_and_deactivates() {
        let access = memory_access("access-shutdown");
        access.shutdown().expect("first shutdown");
        assert!(!access.is_active().expect("factory state readable"));
        access.shutdown().expect("second shutdown is a no-op");

        let err = access.get().expect_err("no session after shutdown");
        assert!(matches!(err, AccessError::Inactive { .. }));
    }

    #[test]
    fn dispose_without_attached_session_is_a_no_op() {
        let access = memory_access("access-dispose-empty");
        assert!(!access.is_attached().expect("attachment state"));
        access.dispose().expect("dispose with empty slot");
        assert!(!access.is_attached().expect("attachment state"));
    }
}
