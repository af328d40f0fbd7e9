// Authorization-code exchange against the provider's token endpoint.
// A failed exchange is never retried: the code is single-use.

use log::warn;
use serde::Deserialize;

use crate::models::TokenSet;
use crate::oauth::OAuthError;
use crate::utils::logging::LoggingHelper;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
}

/// Error body defined by RFC 6749 section 5.2
#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
}

pub struct TokenExchanger {
    http: reqwest::Client,
    provider_name: String,
    token_endpoint: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl TokenExchanger {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        provider_name: String,
        token_endpoint: String,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Self {
        Self {
            http,
            provider_name,
            token_endpoint,
            client_id,
            client_secret,
            redirect_uri,
        }
    }

    /// Exchange an authorization code for access and identity tokens
    ///
    /// Client credentials go in an HTTP Basic header. `redirect_uri` is the
    /// same string that was sent in the authorization request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the provider answers with a
    /// non-success status, or the body is not a token response with an
    /// identity token
    pub async fn exchange(&self, code: &str) -> Result<TokenSet, OAuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        LoggingHelper::log_token_exchange_start(&self.provider_name);
        let response = self
            .http
            .post(&self.token_endpoint)
            .basic_auth(
                form_encode_credential(&self.client_id),
                Some(form_encode_credential(&self.client_secret)),
            )
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| OAuthError::from_reqwest("token exchange", &e))?;

        let status = response.status();
        if !status.is_success() {
            // Only the error code is logged; the body may echo request data
            let error_code = response
                .json::<TokenErrorResponse>()
                .await
                .map_or_else(|_| "unknown".to_string(), |body| body.error);
            warn!(
                "Token exchange with {} failed: HTTP {status}, error={error_code}",
                self.provider_name
            );
            return Err(OAuthError::Status {
                status: status.as_u16(),
                context: "token exchange".to_string(),
            });
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            OAuthError::InvalidResponse(format!("Failed to parse token response: {e}"))
        })?;

        let id_token = token_response
            .id_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                OAuthError::InvalidResponse("token response has no id_token".to_string())
            })?;
        if token_response.access_token.is_empty() {
            return Err(OAuthError::InvalidResponse(
                "token response has an empty access_token".to_string(),
            ));
        }

        LoggingHelper::log_token_exchange_summary(
            &self.provider_name,
            token_response.access_token.len(),
            id_token.len(),
            token_response.expires_in,
            token_response.scope.as_deref(),
        );

        Ok(TokenSet {
            access_token: token_response.access_token,
            id_token,
            expires_in: token_response.expires_in,
            scope: token_response.scope,
        })
    }
}

/// Client credentials are form-urlencoded before Basic encoding (RFC 6749 section 2.3.1)
fn form_encode_credential(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_are_form_encoded() {
        assert_eq!(form_encode_credential("client-123"), "client-123");
        assert_eq!(form_encode_credential("a+b/c=d:e"), "a%2Bb%2Fc%3Dd%3Ae");
        assert_eq!(form_encode_credential("two words"), "two+words");
    }
}
