use actix_web::cookie::{time::Duration, Cookie, SameSite};
use actix_web::HttpRequest;

use crate::settings::CookieSettings;

/// Builds the session cookie: HTTP-only, `SameSite=Lax`, path `/`, expiry
/// aligned with the session token.
#[derive(Clone)]
pub struct SessionCookieFactory {
    name: String,
    secure: bool,
    max_age: Duration,
}

impl SessionCookieFactory {
    #[must_use]
    pub fn new(settings: &CookieSettings, session_lifetime: chrono::Duration) -> Self {
        Self {
            name: settings.name.clone(),
            secure: settings.secure,
            max_age: Duration::seconds(session_lifetime.num_seconds()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cookie carrying a freshly issued session token
    #[must_use]
    pub fn session_cookie(&self, token: &str) -> Cookie<'static> {
        Cookie::build(self.name.clone(), token.to_owned())
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(self.max_age)
            .finish()
    }

    /// Cookie that clears the session in the browser
    #[must_use]
    pub fn expired_cookie(&self) -> Cookie<'static> {
        Cookie::build(self.name.clone(), "")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(Duration::ZERO)
            .expires(actix_web::cookie::time::OffsetDateTime::UNIX_EPOCH)
            .finish()
    }

    /// The session token from a request, if the cookie is present and non-empty
    #[must_use]
    pub fn token_from_request(&self, req: &HttpRequest) -> Option<String> {
        req.cookie(&self.name)
            .map(|cookie| cookie.value().to_string())
            .filter(|value| !value.is_empty())
    }
}
