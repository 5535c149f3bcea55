//! Authentication state owned by one client.

use chrono::{DateTime, Duration, Utc};

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_SKEW_SECS: i64 = 30;

/// Bearer token plus its optional expiry, refreshed in place on re-authentication.
#[derive(Debug, Clone, Default)]
pub struct AuthSession {
    token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl AuthSession {
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// True when a token exists but is at or near its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match (&self.token, self.expires_at) {
            (Some(_), Some(at)) => at <= now + Duration::seconds(EXPIRY_SKEW_SECS),
            _ => false,
        }
    }

    pub fn set(&mut self, token: String, expires_in_secs: Option<u64>, now: DateTime<Utc>) {
        self.token = Some(token);
        self.expires_at = expires_in_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| now + Duration::seconds(secs));
    }

    pub fn clear(&mut self) {
        self.token = None;
        self.expires_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_expiry() {
        let now = Utc::now();
        let mut session = AuthSession::default();
        assert!(!session.is_expired(now));

        session.set("abc".into(), Some(3600), now);
        assert_eq!(session.token(), Some("abc"));
        assert!(!session.is_expired(now));
        assert!(session.is_expired(now + Duration::seconds(3590)));

        session.set("def".into(), None, now);
        assert!(!session.is_expired(now + Duration::days(365)));

        session.clear();
        assert!(!session.is_authenticated());
    }
}
