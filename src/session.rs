use async_trait::async_trait;

/// The authenticated identity behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Read-only source of the current session. `None` means anonymous.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn current(&self) -> Option<Session>;
}

/// A provider that always answers with the same session (or none).
#[derive(Debug, Clone, Default)]
pub struct FixedSession(Option<Session>);

impl FixedSession {
    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self(Some(Session::new(user_id)))
    }
}

impl From<Option<Session>> for FixedSession {
    fn from(session: Option<Session>) -> Self {
        Self(session)
    }
}

#[async_trait]
impl SessionProvider for FixedSession {
    async fn current(&self) -> Option<Session> {
        self.0.clone()
    }
}

/// Resolves the session from a header value set by a trusted fronting proxy.
///
/// Blank values count as anonymous.
pub fn session_from_header(value: Option<&str>) -> Option<Session> {
    value
        .map(str::trim)
        .filter(|user_id| !user_id.is_empty())
        .map(Session::new)
}
