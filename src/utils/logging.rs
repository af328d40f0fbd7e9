// Centralized logging for the login flow. Tokens are never logged, only their presence and size.
use log::{debug, error, info, warn};

use crate::login::LoginError;
use crate::resolver::MatchKind;

pub struct LoggingHelper;

impl LoggingHelper {
    /// Log provider endpoint resolution at startup
    pub fn log_provider_configured(display_name: &str, authorization_endpoint: &str) {
        info!("✅ {display_name} login configured (authorize: {authorization_endpoint})");
    }

    pub fn log_login_initiated(return_to: &str) {
        info!("🔐 Login initiated, returnTo={return_to}");
    }

    pub fn log_token_exchange_start(provider: &str) {
        info!("🔄 Exchanging authorization code for tokens with {provider}");
    }

    pub fn log_token_exchange_summary(
        provider: &str,
        access_token_len: usize,
        id_token_len: usize,
        expires_in: Option<u64>,
        scope: Option<&str>,
    ) {
        info!(
            "🔍 Token exchange summary for {provider}: access_token={access_token_len} chars, id_token={id_token_len} chars, expires_in={expires_in:?}, scope={scope:?}"
        );
    }

    pub fn log_identity_verified(subject: &str) {
        debug!("✅ Identity token verified for subject {subject}");
    }

    pub fn log_candidate_resolved(candidate_id: &str, match_kind: MatchKind) {
        info!("👤 Candidate {candidate_id} resolved ({match_kind})");
    }

    /// Best-effort store writes that failed; the login continues
    pub fn log_reconciliation_failure(operation: &str, candidate_id: &str, cause: &str) {
        error!("⚠️ Non-fatal reconciliation failure during {operation} for candidate {candidate_id}: {cause}");
    }

    pub fn log_session_issued(candidate_id: &str, redirect_to: &str) {
        info!("🎫 Session issued for candidate {candidate_id}, redirecting to {redirect_to}");
    }

    /// Log a failed attempt at a level matching its kind
    pub fn log_login_failure(err: &LoginError) {
        match err {
            LoginError::MissingParameter(_)
            | LoginError::InvalidParameter(_)
            | LoginError::StateExpired
            | LoginError::Provider { .. }
            | LoginError::EmailNotVerified => info!("Login rejected: {err}"),
            LoginError::Verification(_)
            | LoginError::AccountConflict(_)
            | LoginError::ProviderUnavailable(_) => warn!("Login failed: {err}"),
            LoginError::Resolution(_) | LoginError::StateStoreUnavailable(_) => {
                error!("Login failed: {err}");
            }
        }
    }

    pub fn log_callback_debug(req: &actix_web::HttpRequest, callback: &crate::oauth::OAuthCallback) {
        debug!(
            "OAuth callback received via {}: code={}, state={}, error={:?}",
            req.method(),
            if callback.code.is_some() { "present" } else { "missing" },
            if callback.state.is_some() { "present" } else { "missing" },
            callback.error
        );
    }
}
