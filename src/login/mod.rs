//! The login flow from authorization request to issued session
//!
//! [`LoginService::begin`] starts a login; [`LoginService::complete`] runs the
//! callback pipeline: consume pending state, exchange the code, verify the
//! identity token, fetch the profile, resolve the candidate, issue the session
//! and pick a safe redirect. Nothing is retried; any failure ends the attempt.

pub mod error;

use std::sync::Arc;

use log::{info, warn};

use crate::models::normalize_email;
use crate::oauth::{
    AuthorizationInitiator, JwtValidationError, OAuthCallback, OAuthError, ProviderClient,
};
use crate::resolver::{IdentityResolver, MatchKind, ResolveError};
use crate::session::{IssuedSession, SessionIssuer};
use crate::settings::LoginSettings;
use crate::state::PendingStateStore;
use crate::utils::logging::LoggingHelper;
use crate::utils::redirect_validator::{is_safe_relative_path, sanitize_redirect};

pub use error::{provider_error_message, LoginError};

/// Where a finished login sends the browser
#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    pub login_path: String,
    pub registration_path: String,
    pub fallback_path: String,
}

impl RedirectPolicy {
    #[must_use]
    pub fn from_settings(settings: &LoginSettings) -> Self {
        Self {
            login_path: settings.login_path.clone(),
            registration_path: settings.registration_path.clone(),
            fallback_path: settings.fallback_path.clone(),
        }
    }

    /// Incomplete profiles go to registration with the original destination
    /// carried along; complete ones go straight to it. Whatever comes out
    /// must be a single-slash relative path, else the fallback is used.
    #[must_use]
    pub fn destination(&self, return_to: &str, profile_complete: bool) -> String {
        let original = sanitize_redirect(Some(return_to), &self.fallback_path);
        let target = if profile_complete {
            original
        } else {
            let separator = if self.registration_path.contains('?') {
                '&'
            } else {
                '?'
            };
            format!(
                "{}{separator}returnTo={}",
                self.registration_path,
                urlencoding::encode(&original)
            )
        };

        if is_safe_relative_path(&target) {
            target
        } else {
            warn!("Computed redirect target rejected, using fallback");
            self.fallback_path.clone()
        }
    }
}

/// A successful login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub redirect_to: String,
    pub session: IssuedSession,
    pub candidate_id: String,
    pub match_kind: MatchKind,
}

pub struct LoginService {
    initiator: AuthorizationInitiator,
    state_store: Arc<dyn PendingStateStore>,
    provider: Arc<dyn ProviderClient>,
    resolver: IdentityResolver,
    sessions: SessionIssuer,
    redirects: RedirectPolicy,
}

impl LoginService {
    #[must_use]
    pub fn new(
        initiator: AuthorizationInitiator,
        state_store: Arc<dyn PendingStateStore>,
        provider: Arc<dyn ProviderClient>,
        resolver: IdentityResolver,
        sessions: SessionIssuer,
        redirects: RedirectPolicy,
    ) -> Self {
        Self {
            initiator,
            state_store,
            provider,
            resolver,
            sessions,
            redirects,
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionIssuer {
        &self.sessions
    }

    #[must_use]
    pub fn redirects(&self) -> &RedirectPolicy {
        &self.redirects
    }

    /// Start a login and return the provider authorization URL
    ///
    /// # Errors
    ///
    /// Returns `StateStoreUnavailable` if the pending state cannot be stored
    pub async fn begin(&self, return_to: Option<&str>) -> Result<String, LoginError> {
        self.initiator
            .initiate(return_to)
            .await
            .map(|request| request.authorization_url)
            .map_err(|e| LoginError::StateStoreUnavailable(e.to_string()))
    }

    /// Run the callback pipeline
    ///
    /// # Errors
    ///
    /// Returns a classified [`LoginError`] for any failed step
    pub async fn complete(&self, callback: &OAuthCallback) -> Result<LoginOutcome, LoginError> {
        let state_token = non_empty(callback.state.as_deref());

        if let Some(code) = non_empty(callback.error.as_deref()) {
            // The attempt is over either way; don't leave the state usable
            if let Some(token) = state_token {
                if let Err(e) = self.state_store.get_and_delete(token).await {
                    warn!("Failed to discard pending state after provider error: {e}");
                }
            }
            return Err(LoginError::Provider {
                code: code.to_string(),
                description: callback.error_description.clone(),
            });
        }

        let state_token = state_token.ok_or(LoginError::MissingParameter("state"))?;
        let pending = self
            .state_store
            .get_and_delete(state_token)
            .await
            .map_err(|e| LoginError::StateStoreUnavailable(e.to_string()))?
            .ok_or(LoginError::StateExpired)?;

        let code = non_empty(callback.code.as_deref()).ok_or(LoginError::MissingParameter("code"))?;

        let tokens = self
            .provider
            .exchange_code(code)
            .await
            .map_err(|e| LoginError::ProviderUnavailable(e.to_string()))?;

        let identity = self
            .provider
            .verify_identity_token(&tokens.id_token, pending.nonce.as_deref())
            .await
            .map_err(|e| LoginError::Verification(e.to_string()))?;
        LoggingHelper::log_identity_verified(&identity.subject);

        let profile = self
            .provider
            .fetch_profile(&tokens.access_token)
            .await
            .map_err(classify_profile_error)?;
        if profile.subject != identity.subject {
            return Err(LoginError::Verification(
                JwtValidationError::SubjectMismatch.to_string(),
            ));
        }

        let resolution = self
            .resolver
            .resolve(&identity.subject, &profile)
            .await
            .map_err(|e| match e {
                ResolveError::EmailNotVerified => LoginError::EmailNotVerified,
                ResolveError::AccountConflict { candidate_id } => {
                    LoginError::AccountConflict(candidate_id)
                }
                ResolveError::Store(e) => LoginError::Resolution(e.to_string()),
            })?;

        let verified_email = profile
            .verified_email()
            .map(normalize_email)
            .unwrap_or_default();
        let session = self
            .sessions
            .issue(&resolution.candidate, &identity.subject, &verified_email)
            .map_err(|e| LoginError::Resolution(e.to_string()))?;

        let redirect_to = self
            .redirects
            .destination(&pending.return_to, resolution.summary.is_complete());
        LoggingHelper::log_session_issued(&resolution.candidate.id, &redirect_to);

        Ok(LoginOutcome {
            redirect_to,
            session,
            candidate_id: resolution.candidate.id,
            match_kind: resolution.match_kind,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Transport trouble means the provider is unavailable; a bad answer means
/// the identity cannot be trusted.
fn classify_profile_error(err: OAuthError) -> LoginError {
    match err {
        OAuthError::Timeout(_) | OAuthError::Network(_) | OAuthError::Configuration(_) => {
            LoginError::ProviderUnavailable(err.to_string())
        }
        OAuthError::Status { .. } | OAuthError::InvalidResponse(_) => {
            info!("Profile endpoint returned an unusable answer");
            LoginError::Verification(err.to_string())
        }
    }
}
