// Authentication handlers: login initiation and logout
use actix_web::{web, HttpRequest, HttpResponse, Result};
use log::{info, warn};
use serde::Deserialize;

use crate::login::LoginService;
use crate::session::SessionCookieFactory;
use crate::utils::logging::LoggingHelper;
use crate::utils::response_builder::ResponseBuilder;

#[derive(Deserialize)]
pub struct LoginQuery {
    #[serde(rename = "returnTo")]
    pub return_to: Option<String>,
}

/// Start a login: store pending state and send the browser to the provider
///
/// Any existing session cookie is cleared first. A query that cannot be
/// parsed is treated as having no `returnTo`, so the fallback page is used.
///
/// # Errors
/// Never fails; store errors become a redirect to the login page
pub async fn login(
    req: HttpRequest,
    service: web::Data<LoginService>,
    cookies: web::Data<SessionCookieFactory>,
) -> Result<HttpResponse> {
    let clear_cookie = cookies.expired_cookie();
    let return_to = match web::Query::<LoginQuery>::from_query(req.query_string()) {
        Ok(query) => query.into_inner().return_to,
        Err(e) => {
            warn!("Ignoring unparseable login query: {e}");
            None
        }
    };

    match service.begin(return_to.as_deref()).await {
        Ok(authorization_url) => Ok(ResponseBuilder::redirect_with_cookie(
            &authorization_url,
            clear_cookie,
        )),
        Err(err) => {
            LoggingHelper::log_login_failure(&err);
            Ok(ResponseBuilder::login_error_redirect(
                &service.redirects().login_path,
                err.error_code(),
                err.user_message(),
                vec![clear_cookie],
            ))
        }
    }
}

/// Clear the session cookie and return to the fallback page
///
/// # Errors
/// Never fails
pub async fn logout(
    service: web::Data<LoginService>,
    cookies: web::Data<SessionCookieFactory>,
) -> Result<HttpResponse> {
    info!("🚪 User logged out");
    Ok(ResponseBuilder::redirect_with_cookie(
        &service.redirects().fallback_path,
        cookies.expired_cookie(),
    ))
}
