use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("session id {candidate:?} is not a 64-bit hex token")]
pub struct InvalidSessionId {
    pub(crate) candidate: String,
}

/// Identifier of one SMTP session: the 16-hex-digit token minted by the
/// host. The token is validated as 64-bit hex but stored verbatim so
/// leading zeros survive the round trip back onto the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub(crate) fn parse(candidate: &str) -> Result<Self, InvalidSessionId> {
        if candidate.is_empty()
            || !candidate.bytes().all(|b| b.is_ascii_hexdigit())
            || u64::from_str_radix(candidate, 16).is_err()
        {
            return Err(InvalidSessionId {
                candidate: candidate.to_string(),
            });
        }
        Ok(Self(candidate.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(fmt)
    }
}

/// The process-wide session registry: insertions happen on `link-connect`,
/// removals after the `link-disconnect` callback has returned.
pub(crate) type SessionStore<S> = Arc<Mutex<HashMap<SessionId, S>>>;

/// Handle to one SMTP session, given to every callback.
///
/// The handle is cheap to clone and may outlive the callback invocation;
/// [`Session::with_data`] reaches the per-session user data for as long
/// as the session is alive.
pub struct Session<S> {
    id: SessionId,
    store: SessionStore<S>,
}

impl<S> Session<S> {
    pub(crate) fn new(id: SessionId, store: SessionStore<S>) -> Self {
        Self { id, store }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Run `f` over the session's user data, holding the registry lock for
    /// the duration of the call. Returns `None` when the session has no
    /// data slot: no allocator was registered, or the session is already
    /// disconnected.
    pub fn with_data<R>(&self, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        let mut store = self.store.lock();
        store.get_mut(&self.id).map(f)
    }
}

impl<S> Clone for Session<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            store: self.store.clone(),
        }
    }
}

impl<S> fmt::Display for Session<S> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.id.fmt(fmt)
    }
}
