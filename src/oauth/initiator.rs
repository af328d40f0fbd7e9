use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::state::{PendingAuthState, PendingStateStore, StateStoreError};
use crate::utils::crypto::{generate_csrf_token, generate_nonce};
use crate::utils::logging::LoggingHelper;
use crate::utils::redirect_validator::sanitize_redirect;

/// 24 random bytes, base64url encoded
const NONCE_BYTES: usize = 24;

/// A ready-to-follow authorization request and the state persisted for it
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub authorization_url: String,
    pub state: PendingAuthState,
}

/// Builds provider authorization URLs and records the pending state
pub struct AuthorizationInitiator {
    authorization_endpoint: String,
    client_id: String,
    redirect_uri: String,
    scopes: Vec<String>,
    extra_auth_params: HashMap<String, String>,
    fallback_path: String,
    state_ttl: Duration,
    state_store: Arc<dyn PendingStateStore>,
}

impl AuthorizationInitiator {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        authorization_endpoint: String,
        client_id: String,
        redirect_uri: String,
        scopes: Vec<String>,
        extra_auth_params: HashMap<String, String>,
        fallback_path: String,
        state_ttl: Duration,
        state_store: Arc<dyn PendingStateStore>,
    ) -> Self {
        Self {
            authorization_endpoint,
            client_id,
            redirect_uri,
            scopes,
            extra_auth_params,
            fallback_path,
            state_ttl,
            state_store,
        }
    }

    /// Start a login: generate state and nonce, persist them, and build the URL.
    ///
    /// An unsafe or missing `return_to` is replaced by the fallback path before
    /// it is stored, so the callback only ever sees vetted destinations.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending state cannot be stored; the login must not proceed
    pub async fn initiate(
        &self,
        return_to: Option<&str>,
    ) -> Result<AuthorizationRequest, StateStoreError> {
        let return_to = sanitize_redirect(return_to, &self.fallback_path);
        let state = PendingAuthState::new(
            generate_csrf_token(),
            return_to,
            Some(generate_nonce(NONCE_BYTES)),
        );

        self.state_store.put(&state, self.state_ttl).await?;

        let authorization_url = self.build_authorization_url(&state);
        LoggingHelper::log_login_initiated(&state.return_to);

        Ok(AuthorizationRequest {
            authorization_url,
            state,
        })
    }

    fn build_authorization_url(&self, state: &PendingAuthState) -> String {
        let Ok(mut url) = Url::parse(&self.authorization_endpoint) else {
            // Endpoints are validated at startup; fall back to manual assembly
            return format!(
                "{}?{}",
                self.authorization_endpoint,
                self.query_pairs(state)
                    .iter()
                    .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
                    .collect::<Vec<_>>()
                    .join("&")
            );
        };

        url.query_pairs_mut().extend_pairs(self.query_pairs(state));
        url.to_string()
    }

    fn query_pairs(&self, state: &PendingAuthState) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("client_id".to_string(), self.client_id.clone()),
            ("response_type".to_string(), "code".to_string()),
            ("scope".to_string(), self.scopes.join(" ")),
            ("state".to_string(), state.state_token.clone()),
            ("redirect_uri".to_string(), self.redirect_uri.clone()),
        ];
        if let Some(nonce) = &state.nonce {
            pairs.push(("nonce".to_string(), nonce.clone()));
        }

        let mut extras: Vec<_> = self.extra_auth_params.iter().collect();
        extras.sort();
        for (key, value) in extras {
            pairs.push((key.clone(), value.clone()));
        }
        pairs
    }
}
