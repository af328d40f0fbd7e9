use actix_web::{web, HttpRequest, HttpResponse, Result};
use log::debug;

use crate::login::LoginService;
use crate::session::SessionCookieFactory;
use crate::utils::response_builder::ResponseBuilder;

/// Return the verified claims of the current session, or 401
///
/// # Errors
/// Never fails
pub async fn current_session(
    req: HttpRequest,
    service: web::Data<LoginService>,
    cookies: web::Data<SessionCookieFactory>,
) -> Result<HttpResponse> {
    let Some(token) = cookies.token_from_request(&req) else {
        return Ok(ResponseBuilder::unauthorized());
    };

    match service.sessions().verify(&token) {
        Ok(claims) => Ok(HttpResponse::Ok()
            .insert_header(("Cache-Control", "no-store"))
            .json(claims)),
        Err(e) => {
            debug!("Rejected session cookie: {e}");
            Ok(ResponseBuilder::unauthorized())
        }
    }
}
