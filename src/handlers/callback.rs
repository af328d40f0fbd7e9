// OAuth callback handler
use actix_web::{web, HttpRequest, HttpResponse, Result};

use crate::login::{LoginError, LoginService};
use crate::oauth::OAuthCallback;
use crate::session::SessionCookieFactory;
use crate::utils::logging::LoggingHelper;
use crate::utils::response_builder::ResponseBuilder;

/// Finish a login: success sets the session cookie and redirects to the
/// computed destination; any failure clears the cookie and redirects to the
/// login page with an error code and message.
///
/// The query is parsed here rather than through the `Query` extractor so a
/// malformed callback still ends in a redirect instead of a bare 400.
///
/// # Errors
/// Never fails; every outcome is a redirect
pub async fn oauth_callback(
    req: HttpRequest,
    service: web::Data<LoginService>,
    cookies: web::Data<SessionCookieFactory>,
) -> Result<HttpResponse> {
    let outcome = match web::Query::<OAuthCallback>::from_query(req.query_string()) {
        Ok(query) => {
            let callback = query.into_inner();
            LoggingHelper::log_callback_debug(&req, &callback);
            service.complete(&callback).await
        }
        Err(e) => Err(LoginError::InvalidParameter(e.to_string())),
    };

    match outcome {
        Ok(outcome) => Ok(ResponseBuilder::redirect_with_cookie(
            &outcome.redirect_to,
            cookies.session_cookie(&outcome.session.token),
        )),
        Err(err) => {
            LoggingHelper::log_login_failure(&err);
            Ok(ResponseBuilder::login_error_redirect(
                &service.redirects().login_path,
                err.error_code(),
                err.user_message(),
                vec![cookies.expired_cookie()],
            ))
        }
    }
}
