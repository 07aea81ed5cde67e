//! Server-side sessions and the session cookie.
//!
//! The cookie only carries an opaque random identifier; everything known
//! about the user lives in a [`SessionStore`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use axum::http::{HeaderMap, header};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use warden_config::CookieOptions;

/// How long a started login may take before its state is discarded.
pub const PENDING_LOGIN_TTL_SECS: i64 = 10 * 60;

/// Upper bound on logins awaiting their callback; the oldest are evicted first.
pub const MAX_PENDING_LOGINS: usize = 10_000;

/// An authenticated user session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Provider the session was created for.
    pub provider: String,
    pub user: String,
    pub email: String,
    /// Claims returned by the userinfo endpoint.
    pub claims: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Create a session for `provider` from userinfo claims.
    pub fn new(provider: &str, claims: Map<String, Value>, lifetime_secs: u64) -> Self {
        let now = Utc::now();
        let user = ["preferred_username", "sub"]
            .iter()
            .find_map(|key| claims.get(*key).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();
        let email = claims
            .get("email")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let lifetime = Duration::seconds(lifetime_secs.min(u64::from(u32::MAX)) as i64);

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            provider: provider.to_string(),
            user,
            email,
            claims,
            created_at: now,
            expires_at: now + lifetime,
        }
    }

    /// Check if the session has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Resolve a claim as a string. Numbers and booleans are rendered,
    /// objects and arrays are not attributes.
    pub fn attribute(&self, name: &str) -> Option<String> {
        match self.claims.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// A login started but not yet completed by the callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLogin {
    pub provider: String,
    /// Where to send the user once signed in.
    pub redirect: String,
    pub created_at: DateTime<Utc>,
}

impl PendingLogin {
    pub fn new(provider: &str, redirect: String) -> Self {
        Self {
            provider: provider.to_string(),
            redirect,
            created_at: Utc::now(),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::seconds(PENDING_LOGIN_TTL_SECS)
    }
}

/// Storage for sessions and pending logins.
pub trait SessionStore: Send + Sync {
    fn save(&self, session: Session);

    /// Load a live session. Expired sessions are never returned.
    fn load(&self, id: &str) -> Option<Session>;

    fn remove(&self, id: &str);

    fn save_pending(&self, state: &str, pending: PendingLogin);

    /// Consume a pending login; a state can be used once.
    fn take_pending(&self, state: &str) -> Option<PendingLogin>;
}

/// Thread-safe shared session store.
pub type SharedSessionStore = Arc<dyn SessionStore>;

/// In-memory session store.
///
/// Expired sessions are swept whenever a new session is saved. Pending logins
/// are kept in arrival order so stale and surplus states are dropped from the
/// front without scanning the whole map.
#[derive(Debug)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    pending: Mutex<PendingLogins>,
    max_pending: usize,
}

#[derive(Debug, Default)]
struct PendingLogins {
    by_state: HashMap<String, PendingLogin>,
    /// States in insertion order. May still hold states already taken.
    order: VecDeque<String>,
}

impl PendingLogins {
    fn insert(&mut self, state: &str, pending: PendingLogin, now: DateTime<Utc>, max: usize) {
        while let Some(front) = self.order.front() {
            let stale = self.by_state.get(front).is_none_or(|p| p.is_expired(now));
            if !stale && self.order.len() < max {
                break;
            }
            if let Some(front) = self.order.pop_front() {
                self.by_state.remove(&front);
            }
        }
        self.order.push_back(state.to_string());
        self.by_state.insert(state.to_string(), pending);
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::with_pending_limit(MAX_PENDING_LOGINS)
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding at most `max_pending` unfinished logins.
    pub fn with_pending_limit(max_pending: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            pending: Mutex::new(PendingLogins::default()),
            max_pending: max_pending.max(1),
        }
    }

    /// Create a shared handle.
    pub fn shared() -> SharedSessionStore {
        Arc::new(Self::new())
    }

    /// Number of stored sessions. Sessions that expired since the last save
    /// are still counted.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Number of logins awaiting their callback.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().by_state.len()
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, session: Session) {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        sessions.retain(|_, s| !s.is_expired(now));
        sessions.insert(session.id.clone(), session);
    }

    fn load(&self, id: &str) -> Option<Session> {
        let now = Utc::now();
        {
            let sessions = self.sessions.read();
            match sessions.get(id) {
                Some(session) if !session.is_expired(now) => return Some(session.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.sessions.write().remove(id);
        None
    }

    fn remove(&self, id: &str) {
        self.sessions.write().remove(id);
    }

    fn save_pending(&self, state: &str, pending: PendingLogin) {
        self.pending
            .lock()
            .insert(state, pending, Utc::now(), self.max_pending);
    }

    fn take_pending(&self, state: &str) -> Option<PendingLogin> {
        let pending = self.pending.lock().by_state.remove(state)?;
        if pending.is_expired(Utc::now()) {
            return None;
        }
        Some(pending)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cookies
// ─────────────────────────────────────────────────────────────────────────────

/// `Set-Cookie` value carrying a session id.
pub fn session_cookie(cookie: &CookieOptions, value: &str) -> String {
    build_cookie(cookie, value, cookie.expire_secs)
}

/// `Set-Cookie` value that removes the session cookie.
pub fn clear_session_cookie(cookie: &CookieOptions) -> String {
    build_cookie(cookie, "", 0)
}

fn build_cookie(cookie: &CookieOptions, value: &str, max_age: u64) -> String {
    let mut parts = vec![
        format!("{}={}", cookie.name, value),
        format!("Path={}", cookie.path),
        format!("Max-Age={}", max_age),
    ];
    if let Some(domain) = cookie.domains.first() {
        parts.push(format!("Domain={}", domain));
    }
    if cookie.secure {
        parts.push("Secure".to_string());
    }
    if cookie.http_only {
        parts.push("HttpOnly".to_string());
    }
    parts.push(format!("SameSite={}", cookie.same_site.as_str()));
    parts.join("; ")
}

/// Read a cookie value from request headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}
