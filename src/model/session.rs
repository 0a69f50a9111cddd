//! Client session handles

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use uuid::Uuid;

#[derive(Debug)]
struct SessionState {
    id: Uuid,
}

/// Handle to a client session owned by the store driver.
///
/// Equality and hashing use the identity of the underlying session object.
/// Two sessions with the same id created separately are different sessions.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionState>,
}

impl SessionHandle {
    /// Starts a new session
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionState { id: Uuid::new_v4() }),
        }
    }

    /// Session id, for logging
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Compares optional sessions: no session only matches no session.
    pub fn same(a: Option<&SessionHandle>, b: Option<&SessionHandle>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SessionHandle {}

impl Hash for SessionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.inner) as usize).hash(state);
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionHandle({})", self.inner.id)
    }
}
