use log::{debug, warn};

use crate::models::ProviderProfile;
use crate::oauth::OAuthError;

/// Fetches profile claims from the provider's userinfo endpoint
pub struct UserInfoClient {
    http: reqwest::Client,
    userinfo_endpoint: String,
}

impl UserInfoClient {
    #[must_use]
    pub fn new(http: reqwest::Client, userinfo_endpoint: String) -> Self {
        Self {
            http,
            userinfo_endpoint,
        }
    }

    /// Fetch the profile with a bearer access token
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-success status, or a body
    /// that is not a profile with a subject
    pub async fn fetch(&self, access_token: &str) -> Result<ProviderProfile, OAuthError> {
        let response = self
            .http
            .get(&self.userinfo_endpoint)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| OAuthError::from_reqwest("profile fetch", &e))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Profile fetch failed: HTTP {status}");
            return Err(OAuthError::Status {
                status: status.as_u16(),
                context: "profile fetch".to_string(),
            });
        }

        let profile: ProviderProfile = response.json().await.map_err(|e| {
            OAuthError::InvalidResponse(format!("Failed to parse profile response: {e}"))
        })?;
        if profile.subject.is_empty() {
            return Err(OAuthError::InvalidResponse(
                "profile response has an empty sub".to_string(),
            ));
        }

        debug!(
            "Profile fetched: email={}, email_verified={}, phone={}",
            if profile.email.is_some() { "present" } else { "missing" },
            profile.email_verified,
            if profile.phone_number.is_some() { "present" } else { "missing" },
        );
        Ok(profile)
    }
}
