use async_trait::async_trait;

use crate::models::{IdentityToken, ProviderProfile, TokenSet};
use crate::oauth::{JwtValidationError, JwtValidator, OAuthError, TokenExchanger, UserInfoClient};

/// The three provider calls a callback makes, behind one seam
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Swap an authorization code for tokens
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails; it is never retried
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, OAuthError>;

    /// Verify the identity token's signature and claims
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be trusted
    async fn verify_identity_token(
        &self,
        id_token: &str,
        expected_nonce: Option<&str>,
    ) -> Result<IdentityToken, JwtValidationError>;

    /// Fetch profile attributes with the access token
    ///
    /// # Errors
    ///
    /// Returns an error if the profile endpoint does not answer successfully
    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, OAuthError>;
}

/// Provider client that talks to the real endpoints
pub struct HttpProviderClient {
    exchanger: TokenExchanger,
    validator: JwtValidator,
    userinfo: UserInfoClient,
}

impl HttpProviderClient {
    #[must_use]
    pub fn new(exchanger: TokenExchanger, validator: JwtValidator, userinfo: UserInfoClient) -> Self {
        Self {
            exchanger,
            validator,
            userinfo,
        }
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, OAuthError> {
        self.exchanger.exchange(code).await
    }

    async fn verify_identity_token(
        &self,
        id_token: &str,
        expected_nonce: Option<&str>,
    ) -> Result<IdentityToken, JwtValidationError> {
        self.validator
            .validate_id_token(id_token, expected_nonce)
            .await
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, OAuthError> {
        self.userinfo.fetch(access_token).await
    }
}
