//! Session values: credential, request digest, and the shared session
//! handle.
//!
//! # Design
//! `SessionContext` is immutable. Adding or replacing the digest produces a
//! new context, and the shared `Session` swaps its `Arc<SessionContext>`
//! under a lock, so a caller that already cloned the old context finishes
//! its call with consistent headers.
//!
//! A 401 anywhere invalidates the `Session`. Listeners hear about it once
//! per valid→invalid transition; the host redrives the bootstrap instead of
//! reloading, and keeps its in-memory state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::ApiError;
use crate::warm::UserCache;

pub const ACCEPT: &str = "application/json;odata=nometadata";
pub const CONTENT_TYPE: &str = "application/json;odata=verbose";

/// Bearer credential. `Display` yields the `Authorization` header value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    scheme: String,
    token: String,
}

impl Credential {
    pub fn new(scheme: impl Into<String>, token: impl Into<String>) -> Result<Self, ApiError> {
        let scheme = scheme.into();
        let token = token.into();
        if scheme.trim().is_empty() || token.trim().is_empty() {
            return Err(ApiError::InvalidCredential(
                "scheme and token must be non-empty".to_string(),
            ));
        }
        Ok(Self { scheme, token })
    }

    /// Parse a stored `"<scheme> <token>"` header value.
    pub fn parse(header: &str) -> Result<Self, ApiError> {
        let (scheme, token) = header
            .trim()
            .split_once(' ')
            .ok_or_else(|| ApiError::InvalidCredential("expected \"<scheme> <token>\"".to_string()))?;
        Self::new(scheme, token.trim())
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn header_value(&self) -> String {
        format!("{} {}", self.scheme, self.token)
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.scheme, self.token)
    }
}

// Keeps tokens out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("scheme", &self.scheme)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Anti-forgery token required on every mutating call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDigest(String);

impl RequestDigest {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The header state every outbound call is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    credential: Credential,
    digest: Option<RequestDigest>,
}

impl SessionContext {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            digest: None,
        }
    }

    /// A copy of this context carrying `digest`.
    pub fn with_digest(&self, digest: RequestDigest) -> Self {
        Self {
            credential: self.credential.clone(),
            digest: Some(digest),
        }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn digest(&self) -> Option<&RequestDigest> {
        self.digest.as_ref()
    }

    pub fn read_headers(&self) -> Vec<(String, String)> {
        vec![
            ("Authorization".to_string(), self.credential.header_value()),
            ("Accept".to_string(), ACCEPT.to_string()),
        ]
    }

    /// Headers for POST/PATCH/DELETE. Fails if the digest step has not run.
    pub fn write_headers(&self) -> Result<Vec<(String, String)>, ApiError> {
        let digest = self.digest.as_ref().ok_or(ApiError::MissingDigest)?;
        let mut headers = self.read_headers();
        headers.push(("Content-Type".to_string(), CONTENT_TYPE.to_string()));
        headers.push(("X-RequestDigest".to_string(), digest.as_str().to_string()));
        headers.push(("If-Match".to_string(), "*".to_string()));
        Ok(headers)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A call was rejected with 401; the host should redrive the bootstrap.
    Invalidated,
    /// A redriven bootstrap installed a fresh context.
    Refreshed,
}

type Listener = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Shared handle to the live session and its user caches.
pub struct Session {
    context: RwLock<Arc<SessionContext>>,
    users: RwLock<Arc<UserCache>>,
    valid: AtomicBool,
    listeners: Mutex<Vec<Listener>>,
}

impl Session {
    pub fn new(context: SessionContext, users: UserCache) -> Self {
        Self {
            context: RwLock::new(Arc::new(context)),
            users: RwLock::new(Arc::new(users)),
            valid: AtomicBool::new(true),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> Arc<SessionContext> {
        Arc::clone(&self.context.read())
    }

    pub fn users(&self) -> Arc<UserCache> {
        Arc::clone(&self.users.read())
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn subscribe(&self, listener: impl Fn(SessionEvent) + Send + Sync + 'static) {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Mark the session unusable. Returns `true` if this call performed the
    /// transition (and notified listeners).
    pub fn invalidate(&self) -> bool {
        if self.valid.swap(false, Ordering::AcqRel) {
            tracing::warn!("session invalidated by 401 response");
            self.emit(SessionEvent::Invalidated);
            true
        } else {
            false
        }
    }

    /// Install a fresh context and caches and mark the session valid.
    pub fn refresh(&self, context: SessionContext, users: UserCache) {
        *self.context.write() = Arc::new(context);
        *self.users.write() = Arc::new(users);
        self.valid.store(true, Ordering::Release);
        self.emit(SessionEvent::Refreshed);
    }

    // Listeners run without the lock held: they may subscribe, or redrive
    // the bootstrap, which refreshes this session.
    fn emit(&self, event: SessionEvent) {
        let listeners: Vec<Listener> = self.listeners.lock().clone();
        for listener in listeners {
            listener(event);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("context", &*self.context.read())
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}
