use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::authz::Profile;

pub const SESSION_COOKIE_NAME: &str = "perihelion_session";

#[derive(Clone, Debug)]
pub struct SessionCookie {
    pub session_id: String,
}

impl SessionCookie {
    pub fn new(session_id: String) -> Self {
        Self { session_id }
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let cookie_header = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;

        for cookie in cookie_header.split(';') {
            let cookie = cookie.trim();
            if let Some(value) = cookie
                .strip_prefix(SESSION_COOKIE_NAME)
                .and_then(|s| s.strip_prefix('='))
            {
                return Some(Self {
                    session_id: value.to_string(),
                });
            }
        }
        None
    }

    pub fn to_cookie_header(&self, secure: bool, max_age_secs: i64) -> String {
        format!(
            "{}={}; HttpOnly; {}SameSite=Lax; Path=/; Max-Age={}",
            SESSION_COOKIE_NAME,
            self.session_id,
            if secure { "Secure; " } else { "" },
            max_age_secs
        )
    }

    pub fn delete_cookie_header() -> String {
        format!(
            "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0",
            SESSION_COOKIE_NAME
        )
    }
}

struct SessionEntry {
    profile: Profile,
    expires_at: DateTime<Utc>,
}

/// In-memory cache of authenticated profiles, keyed by session cookie id.
///
/// The profile is written once, at authentication time; later requests in
/// the same session reuse it as-is. A rule-table reload therefore only
/// affects principals who authenticate after the reload — cached sessions
/// keep the enrichment they were granted.
pub struct SessionStore {
    sessions: DashMap<String, SessionEntry>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl.num_seconds()
    }

    pub fn create(&self, profile: Profile) -> SessionCookie {
        let session_id = Uuid::new_v4().to_string();
        self.sessions.insert(
            session_id.clone(),
            SessionEntry {
                profile,
                expires_at: Utc::now() + self.ttl,
            },
        );
        SessionCookie::new(session_id)
    }

    /// Expired entries are dropped lazily on read.
    pub fn get(&self, session_id: &str) -> Option<Profile> {
        let expired = match self.sessions.get(session_id) {
            Some(entry) if entry.expires_at > Utc::now() => return Some(entry.profile.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.sessions.remove(session_id);
        }
        None
    }

    pub fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_cookie_round_trip() {
        let store = SessionStore::new(3600);
        let cookie = store.create(Profile::new("alice"));

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_str(&format!(
                "other=1; {}={}",
                SESSION_COOKIE_NAME, cookie.session_id
            ))
            .unwrap(),
        );

        let parsed = SessionCookie::from_headers(&headers).unwrap();
        assert_eq!(parsed.session_id, cookie.session_id);
        assert_eq!(store.get(&parsed.session_id).unwrap().id(), "alice");
    }

    #[test]
    fn test_expired_session_dropped() {
        let store = SessionStore::new(0);
        let cookie = store.create(Profile::new("alice"));
        assert!(store.get(&cookie.session_id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove() {
        let store = SessionStore::new(3600);
        let cookie = store.create(Profile::new("alice"));
        store.remove(&cookie.session_id);
        assert!(store.get(&cookie.session_id).is_none());
    }

    #[test]
    fn test_cookie_header_flags() {
        let cookie = SessionCookie::new("abc".to_string());
        let header = cookie.to_cookie_header(true, 3600);
        assert!(header.contains("Secure; "));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("Max-Age=3600"));

        let header = cookie.to_cookie_header(false, 3600);
        assert!(!header.contains("Secure"));
    }
}
