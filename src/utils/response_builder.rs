use actix_web::{cookie::Cookie, HttpResponse};

pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Create a redirect response with optional cookies
    #[must_use]
    pub fn redirect(location: &str, cookies: Vec<Cookie<'static>>) -> HttpResponse {
        let mut builder = HttpResponse::Found();

        for cookie in cookies {
            builder.cookie(cookie);
        }

        builder
            .insert_header(("Cache-Control", "no-store"))
            .append_header(("Location", location))
            .finish()
    }

    /// Create a redirect response with a single cookie
    #[must_use]
    pub fn redirect_with_cookie(location: &str, cookie: Cookie<'static>) -> HttpResponse {
        Self::redirect(location, vec![cookie])
    }

    /// Redirect to the login page carrying an error code and a human-readable message
    #[must_use]
    pub fn login_error_redirect(
        login_path: &str,
        error_code: &str,
        message: &str,
        cookies: Vec<Cookie<'static>>,
    ) -> HttpResponse {
        let location = Self::login_error_location(login_path, error_code, message);
        Self::redirect(&location, cookies)
    }

    #[must_use]
    pub fn login_error_location(login_path: &str, error_code: &str, message: &str) -> String {
        let separator = if login_path.contains('?') { '&' } else { '?' };
        format!(
            "{login_path}{separator}error={}&message={}",
            urlencoding::encode(error_code),
            urlencoding::encode(message)
        )
    }

    #[must_use]
    pub fn unauthorized() -> HttpResponse {
        HttpResponse::Unauthorized().json(serde_json::json!({
            "error": "unauthorized",
            "message": "No valid session"
        }))
    }
}
