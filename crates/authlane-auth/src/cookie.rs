//! Cookies for the browser session flow.
//!
//! Session cookies are `HttpOnly`, `SameSite=Strict` and bounded by the
//! absolute session timeout. The OAuth state cookie is `SameSite=Lax`
//! because the provider's redirect back to us is a cross-site navigation.

use cookie::{Cookie, SameSite};
use time::Duration;

use crate::clock::to_time_duration;
use crate::config::{OAuthClientConfig, SessionConfig, SessionCookieConfig};

/// Builds and reads the cookies the session flow relies on.
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    config: SessionCookieConfig,
    session_max_age: Duration,
    oauth_max_age: Duration,
}

impl CookiePolicy {
    /// Creates a policy from the session and OAuth configuration.
    #[must_use]
    pub fn new(session: &SessionConfig, oauth: &OAuthClientConfig) -> Self {
        Self {
            config: session.cookie.clone(),
            session_max_age: to_time_duration(session.absolute_timeout),
            oauth_max_age: to_time_duration(oauth.state_ttl),
        }
    }

    /// Session cookie name.
    #[must_use]
    pub fn session_name(&self) -> &str {
        &self.config.name
    }

    /// OAuth state cookie name.
    #[must_use]
    pub fn oauth_state_name(&self) -> &str {
        &self.config.oauth_state_name
    }

    /// Cookie carrying a session id.
    #[must_use]
    pub fn session_cookie(&self, session_id: &str) -> Cookie<'static> {
        self.build(
            self.config.name.clone(),
            session_id.to_string(),
            SameSite::Strict,
            self.session_max_age,
        )
    }

    /// Cookie that clears the session cookie.
    #[must_use]
    pub fn expired_session_cookie(&self) -> Cookie<'static> {
        self.build(
            self.config.name.clone(),
            String::new(),
            SameSite::Strict,
            Duration::ZERO,
        )
    }

    /// Cookie binding a pending OAuth flow to the browser that started it.
    #[must_use]
    pub fn oauth_state_cookie(&self, state: &str) -> Cookie<'static> {
        self.build(
            self.config.oauth_state_name.clone(),
            state.to_string(),
            SameSite::Lax,
            self.oauth_max_age,
        )
    }

    /// Cookie that clears the OAuth state cookie.
    #[must_use]
    pub fn expired_oauth_state_cookie(&self) -> Cookie<'static> {
        self.build(
            self.config.oauth_state_name.clone(),
            String::new(),
            SameSite::Lax,
            Duration::ZERO,
        )
    }

    fn build(
        &self,
        name: String,
        value: String,
        same_site: SameSite,
        max_age: Duration,
    ) -> Cookie<'static> {
        let mut builder = Cookie::build((name, value))
            .http_only(true)
            .secure(self.config.secure)
            .same_site(same_site)
            .path(self.config.path.clone())
            .max_age(max_age);
        if let Some(domain) = &self.config.domain {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }
}

/// Returns the value of cookie `name` from a `Cookie` request header.
#[must_use]
pub fn find_cookie(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| Cookie::parse(pair.trim()).ok())
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CookiePolicy {
        CookiePolicy::new(&SessionConfig::default(), &OAuthClientConfig::default())
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = policy().session_cookie("sid").to_string();
        assert!(cookie.starts_with("authlane_session=sid"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains("Max-Age=43200"));
    }

    #[test]
    fn test_expired_cookie() {
        let cookie = policy().expired_session_cookie().to_string();
        assert!(cookie.contains("Max-Age=0"));
    }

    #[test]
    fn test_oauth_cookie_is_lax() {
        let cookie = policy().oauth_state_cookie("st").to_string();
        assert!(cookie.starts_with("authlane_oauth=st"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Max-Age=600"));
    }

    #[test]
    fn test_domain_is_applied() {
        let mut session = SessionConfig::default();
        session.cookie.domain = Some("example.com".to_string());
        session.cookie.secure = false;
        let cookie = CookiePolicy::new(&session, &OAuthClientConfig::default())
            .session_cookie("sid")
            .to_string();
        assert!(cookie.contains("Domain=example.com"));
        assert!(!cookie.contains("Secure"));
    }

    #[test]
    fn test_find_cookie() {
        let header = "theme=dark; authlane_session=abc; other=1";
        assert_eq!(find_cookie(header, "authlane_session").as_deref(), Some("abc"));
        assert_eq!(find_cookie(header, "missing"), None);
        assert_eq!(find_cookie("authlane_session=", "authlane_session"), None);
    }
}
