//! OAuth/OIDC provider integration
//!
//! This module covers everything that talks to the identity provider:
//! building the authorization request, exchanging the code, verifying the
//! identity token against the published key set and fetching the profile.

pub mod client;
pub mod initiator;
pub mod jwt_validation;
pub mod token_exchange;
pub mod userinfo;

pub use client::{HttpProviderClient, ProviderClient};
pub use initiator::{AuthorizationInitiator, AuthorizationRequest};
pub use jwt_validation::{
    HttpKeySetSource, JsonWebKey, JsonWebKeySet, JwksCache, JwtValidationError, JwtValidator,
    KeySetSource,
};
pub use token_exchange::TokenExchanger;
pub use userinfo::UserInfoClient;

use std::time::Duration;

use log::{debug, info};
use serde::Deserialize;

use crate::settings::ProviderSettings;

/// Query parameters delivered to the callback endpoint
#[derive(Deserialize, Debug, Default, Clone)]
pub struct OAuthCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Failures talking to the provider over HTTP
#[derive(Debug)]
pub enum OAuthError {
    Configuration(String),
    Timeout(String),
    Network(String),
    Status { status: u16, context: String },
    InvalidResponse(String),
}

impl std::fmt::Display for OAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "OAuth configuration error: {msg}"),
            Self::Timeout(context) => write!(f, "Provider request timed out: {context}"),
            Self::Network(msg) => write!(f, "Provider request failed: {msg}"),
            Self::Status { status, context } => {
                write!(f, "Provider returned HTTP {status} for {context}")
            }
            Self::InvalidResponse(msg) => write!(f, "Malformed provider response: {msg}"),
        }
    }
}

impl std::error::Error for OAuthError {}

impl OAuthError {
    /// Classify a transport error, keeping timeouts distinct
    pub(crate) fn from_reqwest(context: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(context.to_string())
        } else {
            Self::Network(format!("{context}: {err}"))
        }
    }
}

/// Subset of the OIDC discovery document this service consumes
#[derive(Debug, Deserialize)]
pub struct OidcDiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

/// Provider endpoints after merging explicit settings with discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub jwks_uri: String,
}

impl ProviderEndpoints {
    /// Resolve endpoints, fetching the discovery document when one is configured.
    /// Values set explicitly in settings win over discovered ones.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails or an endpoint is still unknown afterwards
    pub async fn resolve(
        settings: &ProviderSettings,
        http: &reqwest::Client,
    ) -> Result<Self, OAuthError> {
        let discovered = match &settings.discovery_url {
            Some(url) => Some(fetch_discovery_document(http, url).await?),
            None => None,
        };
        Self::merge(settings, discovered.as_ref())
    }

    /// Merge settings over an optional discovery document
    ///
    /// # Errors
    ///
    /// Returns an error naming the first endpoint that could not be determined
    pub fn merge(
        settings: &ProviderSettings,
        discovered: Option<&OidcDiscoveryDocument>,
    ) -> Result<Self, OAuthError> {
        fn pick(
            name: &str,
            explicit: Option<&String>,
            discovered: Option<&str>,
        ) -> Result<String, OAuthError> {
            explicit
                .map(String::as_str)
                .or(discovered)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string)
                .ok_or_else(|| {
                    OAuthError::Configuration(format!(
                        "{name} is not configured and was not discovered"
                    ))
                })
        }

        Ok(Self {
            issuer: pick(
                "issuer",
                settings.issuer.as_ref(),
                discovered.map(|doc| doc.issuer.as_str()),
            )?,
            authorization_endpoint: pick(
                "authorization_endpoint",
                settings.authorization_endpoint.as_ref(),
                discovered.map(|doc| doc.authorization_endpoint.as_str()),
            )?,
            token_endpoint: pick(
                "token_endpoint",
                settings.token_endpoint.as_ref(),
                discovered.map(|doc| doc.token_endpoint.as_str()),
            )?,
            userinfo_endpoint: pick(
                "userinfo_endpoint",
                settings.userinfo_endpoint.as_ref(),
                discovered.and_then(|doc| doc.userinfo_endpoint.as_deref()),
            )?,
            jwks_uri: pick(
                "jwks_uri",
                settings.jwks_uri.as_ref(),
                discovered.map(|doc| doc.jwks_uri.as_str()),
            )?,
        })
    }
}

/// Build the shared HTTP client used for every provider call
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, OAuthError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| OAuthError::Configuration(format!("Failed to build HTTP client: {e}")))
}

/// Fetch discovery document from the given URL
///
/// # Errors
///
/// Returns an error if:
/// - Network request fails or times out
/// - Response status is not a success
/// - Response doesn't contain the required fields
pub async fn fetch_discovery_document(
    http: &reqwest::Client,
    discovery_url: &str,
) -> Result<OidcDiscoveryDocument, OAuthError> {
    debug!("Fetching discovery document from: {discovery_url}");

    let response = http
        .get(discovery_url)
        .send()
        .await
        .map_err(|e| OAuthError::from_reqwest("discovery document", &e))?;

    if !response.status().is_success() {
        return Err(OAuthError::Status {
            status: response.status().as_u16(),
            context: "discovery document".to_string(),
        });
    }

    let document: OidcDiscoveryDocument = response.json().await.map_err(|e| {
        OAuthError::InvalidResponse(format!("Failed to parse discovery document: {e}"))
    })?;

    info!(
        "Discovered provider endpoints for issuer {}",
        document.issuer
    );
    Ok(document)
}
