//! SQLite-backed persistence engine.
//!
//! # Responsibility
//! - Validate unit properties into concrete SQLite settings.
//! - Open one connection per session, file-backed or in-memory.
//! - Apply connection pragmas before handing a session out.
//!
//! # Invariants
//! - Sessions carry `foreign_keys` configured as requested (default ON).
//! - A closed factory never produces another session.

use super::{EngineError, EngineResult, PersistenceEngine, Session, SessionFactory};
use crate::properties::UnitProperties;
use log::{error, info};
use rusqlite::Connection;
use std::any::Any;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Storage mode option: `memory` (default) or `file`.
pub const PROP_MODE: &str = "mode";
/// Database file path, required when `mode=file`.
pub const PROP_PATH: &str = "path";
/// Busy timeout in milliseconds, default 5000.
pub const PROP_BUSY_TIMEOUT_MS: &str = "busy_timeout_ms";
/// Foreign-key enforcement: `on` (default) or `off`.
pub const PROP_FOREIGN_KEYS: &str = "foreign_keys";

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageMode {
    Memory,
    File,
}

impl StorageMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File => "file",
        }
    }
}

/// Resolved storage target: validation guarantees file mode carries a path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StorageTarget {
    Memory,
    File(PathBuf),
}

impl StorageTarget {
    fn mode(&self) -> StorageMode {
        match self {
            Self::Memory => StorageMode::Memory,
            Self::File(_) => StorageMode::File,
        }
    }
}

#[derive(Debug, Clone)]
struct SqliteSettings {
    target: StorageTarget,
    busy_timeout: Duration,
    foreign_keys: bool,
}

impl SqliteSettings {
    fn from_properties(properties: &UnitProperties) -> EngineResult<Self> {
        let mut mode = StorageMode::Memory;
        let mut path: Option<PathBuf> = None;
        let mut busy_timeout = Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS);
        let mut foreign_keys = true;

        for (name, value) in properties.iter() {
            match name {
                PROP_MODE => {
                    mode = match value {
                        "memory" => StorageMode::Memory,
                        "file" => StorageMode::File,
                        other => {
                            return Err(EngineError::InvalidProperty {
                                name: PROP_MODE.to_string(),
                                message: format!("expected memory|file, got `{other}`"),
                            })
                        }
                    };
                }
                PROP_PATH => path = Some(PathBuf::from(value)),
                PROP_BUSY_TIMEOUT_MS => {
                    let millis: u64 = value.parse().map_err(|_| EngineError::InvalidProperty {
                        name: PROP_BUSY_TIMEOUT_MS.to_string(),
                        message: format!("expected a non-negative integer, got `{value}`"),
                    })?;
                    busy_timeout = Duration::from_millis(millis);
                }
                PROP_FOREIGN_KEYS => {
                    foreign_keys = match value {
                        "on" => true,
                        "off" => false,
                        other => {
                            return Err(EngineError::InvalidProperty {
                                name: PROP_FOREIGN_KEYS.to_string(),
                                message: format!("expected on|off, got `{other}`"),
                            })
                        }
                    };
                }
                other => {
                    return Err(EngineError::InvalidProperty {
                        name: other.to_string(),
                        message: "unsupported sqlite engine property".to_string(),
                    })
                }
            }
        }

        let target = match (mode, path) {
            (StorageMode::Memory, _) => StorageTarget::Memory,
            (StorageMode::File, Some(path)) => StorageTarget::File(path),
            (StorageMode::File, None) => {
                return Err(EngineError::InvalidProperty {
                    name: PROP_PATH.to_string(),
                    message: "required when mode=file".to_string(),
                })
            }
        };

        Ok(Self {
            target,
            busy_timeout,
            foreign_keys,
        })
    }
}

/// SQLite implementation of [`PersistenceEngine`].
#[derive(Debug, Default)]
pub struct SqliteEngine;

impl SqliteEngine {
    pub fn new() -> Self {
        Self
    }
}

impl PersistenceEngine for SqliteEngine {
    fn create_factory(
        &self,
        unit_name: &str,
        properties: &UnitProperties,
    ) -> EngineResult<Arc<dyn SessionFactory>> {
        let unit_name = unit_name.trim();
        if unit_name.is_empty() {
            return Err(EngineError::UnknownUnit(unit_name.to_string()));
        }

        let settings = SqliteSettings::from_properties(properties)?;
        info!(
            "event=factory_create module=engine status=ok unit={} mode={}",
            unit_name,
            settings.target.mode().as_str()
        );

        Ok(Arc::new(SqliteSessionFactory {
            unit_name: unit_name.to_string(),
            settings,
            open: AtomicBool::new(true),
        }))
    }
}

/// Factory holding validated settings; opens one connection per session.
#[derive(Debug)]
pub struct SqliteSessionFactory {
    unit_name: String,
    settings: SqliteSettings,
    open: AtomicBool,
}

impl SessionFactory for SqliteSessionFactory {
    fn unit_name(&self) -> &str {
        &self.unit_name
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) -> EngineResult<()> {
        self.open.store(false, Ordering::SeqCst);
        info!(
            "event=factory_close module=engine status=ok unit={}",
            self.unit_name
        );
        Ok(())
    }

    fn create_session(&self) -> EngineResult<Rc<dyn Session>> {
        if !self.is_open() {
            return Err(EngineError::FactoryClosed(self.unit_name.clone()));
        }

        let started_at = Instant::now();
        let mode = self.settings.target.mode().as_str();

        let open_result = match &self.settings.target {
            StorageTarget::Memory => Connection::open_in_memory(),
            StorageTarget::File(path) => Connection::open(path),
        };

        let conn = match open_result {
            Ok(conn) => conn,
            Err(err) => {
                error!(
                    "event=engine_open module=engine status=error unit={} mode={} duration_ms={} error_code=open_failed error={}",
                    self.unit_name,
                    mode,
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(err.into());
            }
        };

        if let Err(err) = bootstrap_connection(&conn, &self.settings) {
            error!(
                "event=engine_open module=engine status=error unit={} mode={} duration_ms={} error_code=bootstrap_failed error={}",
                self.unit_name,
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err);
        }

        let session_id = Uuid::new_v4();
        info!(
            "event=engine_open module=engine status=ok unit={} mode={} duration_ms={} session_id={}",
            self.unit_name,
            mode,
            started_at.elapsed().as_millis(),
            session_id
        );

        Ok(Rc::new(SqliteSession {
            session_id,
            conn: RefCell::new(Some(conn)),
        }))
    }
}

fn bootstrap_connection(conn: &Connection, settings: &SqliteSettings) -> EngineResult<()> {
    let pragma = if settings.foreign_keys {
        "PRAGMA foreign_keys = ON;"
    } else {
        "PRAGMA foreign_keys = OFF;"
    };
    conn.execute_batch(pragma)?;
    conn.busy_timeout(settings.busy_timeout)?;
    Ok(())
}

/// One SQLite session: a thread-owned connection plus an open flag.
#[derive(Debug)]
pub struct SqliteSession {
    session_id: Uuid,
    conn: RefCell<Option<Connection>>,
}

impl SqliteSession {
    /// Runs `f` against the underlying connection.
    ///
    /// Fails with [`EngineError::SessionClosed`] once the session is closed.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> EngineResult<T> {
        match self.conn.borrow().as_ref() {
            Some(conn) => f(conn).map_err(EngineError::from),
            None => Err(EngineError::SessionClosed(self.session_id)),
        }
    }
}

impl Session for SqliteSession {
    fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn is_open(&self) -> bool {
        self.conn.borrow().is_some()
    }

    fn close(&self) -> EngineResult<()> {
        let Some(conn) = self.conn.borrow_mut().take() else {
            return Ok(());
        };
        conn.close().map_err(|(_conn, err)| EngineError::Sqlite(err))?;
        info!(
            "event=engine_close module=engine status=ok session_id={}",
            self.session_id
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{
        SqliteEngine, SqliteSettings, StorageTarget, PROP_BUSY_TIMEOUT_MS, PROP_FOREIGN_KEYS,
        PROP_MODE, PROP_PATH,
    };
    use crate::engine::{EngineError, PersistenceEngine, Session, SessionFactory};
    use crate::properties::UnitProperties;
    use std::time::Duration;

    fn properties(entries: &[(&str, &str)]) -> UnitProperties {
        let mut props = UnitProperties::new();
        for (name, value) in entries {
            props.put(*name, *value);
        }
        props
    }

    #[test]
    fn defaults_to_memory_mode_with_foreign_keys_on() {
        let settings = SqliteSettings::from_properties(&UnitProperties::new())
            .expect("empty properties should validate");
        assert_eq!(settings.target, StorageTarget::Memory);
        assert!(settings.foreign_keys);
        assert_eq!(settings.busy_timeout, Duration::from_millis(5_000));
    }

    #[test]
    fn parses_file_mode_with_path_and_overrides() {
        let settings = SqliteSettings::from_properties(&properties(&[
            (PROP_MODE, "file"),
            (PROP_PATH, "/tmp/orders.db"),
            (PROP_BUSY_TIMEOUT_MS, "250"),
            (PROP_FOREIGN_KEYS, "off"),
        ]))
        .expect("file settings should validate");
        assert_eq!(
            settings.target,
            StorageTarget::File(std::path::PathBuf::from("/tmp/orders.db"))
        );
        assert!(!settings.foreign_keys);
        assert_eq!(settings.busy_timeout, Duration::from_millis(250));
    }

    #[test]
    fn rejects_file_mode_without_path() {
        let err = SqliteSettings::from_properties(&properties(&[(PROP_MODE, "file")]))
            .expect_err("file mode without path must fail");
        assert!(matches!(err, EngineError::InvalidProperty { ref name, .. } if name == PROP_PATH));
    }

    #[test]
    fn rejects_unknown_property_and_bad_values() {
        let err = SqliteSettings::from_properties(&properties(&[("pool_size", "8")]))
            .expect_err("unknown property must fail");
        assert!(
            matches!(err, EngineError::InvalidProperty { ref name, .. } if name == "pool_size")
        );

        let err = SqliteSettings::from_properties(&properties(&[(PROP_MODE, "network")]))
            .expect_err("unknown mode must fail");
        assert!(matches!(err, EngineError::InvalidProperty { ref name, .. } if name == PROP_MODE));

        let err = SqliteSettings::from_properties(&properties(&[(PROP_BUSY_TIMEOUT_MS, "soon")]))
            .expect_err("non-numeric timeout must fail");
        assert!(
            matches!(err, EngineError::InvalidProperty { ref name, .. } if name == PROP_BUSY_TIMEOUT_MS)
        );
    }

    #[test]
    fn blank_unit_name_is_unknown() {
        let engine = SqliteEngine::new();
        let err = engine
            .create_factory("   ", &UnitProperties::new())
            .expect_err("blank unit name must fail");
        assert!(matches!(err, EngineError::UnknownUnit(_)));
    }

    #[test]
    fn closed_factory_stops_producing_sessions() {
        let engine = SqliteEngine::new();
        let factory = engine
            .create_factory("sqlite-close-check", &UnitProperties::new())
            .expect("factory creation");
        assert!(factory.is_open());

        let session = factory.create_session().expect("session creation");
        assert!(session.is_open());

        factory.close().expect("factory close");
        assert!(!factory.is_open());
        let err = factory
            .create_session()
            .expect_err("closed factory must not produce sessions");
        assert!(matches!(err, EngineError::FactoryClosed(_)));

        // The already-issued session outlives the factory close.
        assert!(session.is_open());
    }

    #[test]
    fn session_close_is_idempotent_and_blocks_sql() {
        let engine = SqliteEngine::new();
        let factory = engine
            .create_factory("sqlite-session-close", &UnitProperties::new())
            .expect("factory creation");
        let session = factory.create_session().expect("session creation");

        let sqlite = session
            .as_any()
            .downcast_ref::<super::SqliteSession>()
            .expect("sqlite session concrete type");
        sqlite
            .with_connection(|conn| conn.execute_batch("CREATE TABLE t (id INTEGER);"))
            .expect("sql on open session");

        session.close().expect("first close");
        assert!(!session.is_open());
        session.close().expect("second close is a no-op");

        let err = sqlite
            .with_connection(|conn| conn.execute_batch("SELECT 1;"))
            .expect_err("sql on closed session must fail");
        assert!(matches!(err, EngineError::SessionClosed(_)));
    }

    #[test]
    fn foreign_keys_pragma_follows_properties() {
        let engine = SqliteEngine::new();
        let factory = engine
            .create_factory(
                "sqlite-fk-off",
                &properties(&[(PROP_FOREIGN_KEYS, "off")]),
            )
            .expect("factory creation");
        let session = factory.create_session().expect("session creation");
        let sqlite = session
            .as_any()
            .downcast_ref::<super::SqliteSession>()
            .expect("sqlite session concrete type");

        let enabled: i64 = sqlite
            .with_connection(|conn| {
                conn.query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            })
            .expect("pragma query");
        assert_eq!(enabled, 0);
    }
}
