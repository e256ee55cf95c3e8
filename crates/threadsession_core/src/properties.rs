//! Pre-initialization configuration for one persistence unit.
//!
//! # Responsibility
//! - Hold the option map used to build a session factory.
//! - Keep option ordering stable for diagnostics snapshots.
//!
//! # Invariants
//! - Mutation is only reachable through `PerThreadSessionAccess::configure`,
//!   which rejects changes once the unit's factory exists.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// String-keyed option map for one persistence unit.
///
/// Option names and their accepted values are defined by the engine that
/// consumes them; this type stores them verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitProperties {
    options: BTreeMap<String, String>,
}

impl UnitProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one option, replacing any previous value. Returns `&mut self`
    /// so configure closures can chain calls.
    pub fn put(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.options.insert(name.into(), value.into());
        self
    }

    /// Returns one option value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    /// Removes one option, returning its previous value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.options.remove(name)
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Iterates options in stable name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}
