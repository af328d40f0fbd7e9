// HTTP request handlers for the login gateway
pub mod auth;
pub mod callback;
pub mod health;
pub mod session;

use actix_web::web;

pub use auth::{login, logout};
pub use callback::oauth_callback;
pub use health::ping;
pub use session::current_session;

/// Register every route; the callback path is configurable because it is
/// registered with the provider.
pub fn configure(cfg: &mut web::ServiceConfig, callback_path: &str) {
    cfg.route("/ping", web::get().to(ping))
        .route("/auth/login", web::get().to(login))
        .route(callback_path, web::get().to(oauth_callback))
        .route("/auth/logout", web::get().to(logout))
        .route("/auth/logout", web::post().to(logout))
        .route("/auth/session", web::get().to(current_session));
}
