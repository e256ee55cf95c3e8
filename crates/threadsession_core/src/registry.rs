//! Process-wide session-factory registry.
//!
//! # Responsibility
//! - Hold at most one session factory per persistence-unit name for the
//!   lifetime of the process.
//! - Settle concurrent first-access races so every caller observes the same
//!   stored factory.
//!
//! # Invariants
//! - A stored factory is never replaced or removed; a closed factory stays
//!   closed for its name.

use crate::engine::{EngineResult, SessionFactory};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static FACTORIES: Lazy<Mutex<BTreeMap<String, Arc<dyn SessionFactory>>>> =
    Lazy::new(|| Mutex::new(BTreeMap::new()));

fn factories() -> MutexGuard<'static, BTreeMap<String, Arc<dyn SessionFactory>>> {
    // The map stays valid across a panicking holder; poisoning is absorbed.
    FACTORIES.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returns whether a factory is already registered for `unit_name`.
pub fn contains(unit_name: &str) -> bool {
    factories().contains_key(unit_name)
}

/// Returns the factory for `unit_name`, building one when absent.
///
/// The build closure runs outside the registry lock, so two threads racing on
/// first access may both build a candidate; insert-if-absent keeps exactly one
/// and drops the losing candidate. Every caller observes the same stored
/// factory for a given name. Build failures propagate and nothing is stored.
pub fn get_or_create(
    unit_name: &str,
    build: impl FnOnce() -> EngineResult<Arc<dyn SessionFactory>>,
) -> EngineResult<Arc<dyn SessionFactory>> {
    if let Some(existing) = factories().get(unit_name) {
        return Ok(Arc::clone(existing));
    }

    let candidate = build()?;
    let mut map = factories();
    Ok(Arc::clone(
        map.entry(unit_name.to_string()).or_insert(candidate),
    ))
}
