//! Capability surface for components that work with the current thread's
//! session.

use crate::access::{AccessResult, PerThreadSessionAccess};
use crate::engine::Session;
use std::rc::Rc;

/// Contract for any component able to supply a [`PerThreadSessionAccess`].
///
/// Implementors get [`session`](Self::session) for free; consuming code calls
/// it without knowing that a thread-scoped cache sits behind it.
pub trait WithPerThreadSession {
    fn session_access(&self) -> &PerThreadSessionAccess;

    /// Returns the calling thread's session, attaching one if needed.
    fn session(&self) -> AccessResult<Rc<dyn Session>> {
        self.session_access().get()
    }
}
