//! Transient identity data produced while a login is in flight. None of it is persisted.

use serde::{Deserialize, Serialize};

/// Tokens returned by the authorization-code exchange
#[derive(Clone, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub id_token: String,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

// Tokens are credentials; keep them out of debug output
impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[redacted]")
            .field("id_token", &"[redacted]")
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Verified claims of the provider's identity token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityToken {
    pub subject: String,
    pub issuer: String,
    pub audience: Vec<String>,
    pub issued_at: Option<i64>,
    pub expires_at: i64,
    pub nonce: Option<String>,
}

/// Profile attributes from the provider's userinfo endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    #[serde(rename = "sub")]
    pub subject: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub phone_number: Option<String>,
}

impl ProviderProfile {
    /// The email, but only when the provider vouches for it
    #[must_use]
    pub fn verified_email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| self.email_verified && !email.is_empty())
    }

    /// Display name, assembled from the name parts when the full name is missing
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        if let Some(name) = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return Some(name.to_string());
        }
        let parts: Vec<&str> = [self.given_name.as_deref(), self.family_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// Lowercase and trim an email address for matching
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unverified_email_is_absent() {
        let profile = ProviderProfile {
            subject: "sub-1".to_string(),
            email: Some("ola@example.no".to_string()),
            email_verified: false,
            ..Default::default()
        };
        assert_eq!(profile.verified_email(), None);

        let verified = ProviderProfile {
            email_verified: true,
            ..profile
        };
        assert_eq!(verified.verified_email(), Some("ola@example.no"));
    }

    #[test]
    fn test_blank_email_is_absent() {
        let profile = ProviderProfile {
            subject: "sub-1".to_string(),
            email: Some("   ".to_string()),
            email_verified: true,
            ..Default::default()
        };
        assert_eq!(profile.verified_email(), None);
    }

    #[test]
    fn test_profile_deserializes_userinfo_shape() {
        let profile: ProviderProfile = serde_json::from_str(
            r#"{"sub":"abc","name":"Kari Nordmann","given_name":"Kari","family_name":"Nordmann",
                "email":"Kari@Example.no","email_verified":true,"phone_number":"4712345678","other":1}"#,
        )
        .unwrap();
        assert_eq!(profile.subject, "abc");
        assert_eq!(profile.phone_number.as_deref(), Some("4712345678"));
        assert!(profile.email_verified);
    }

    #[test]
    fn test_missing_email_verified_defaults_to_false() {
        let profile: ProviderProfile =
            serde_json::from_str(r#"{"sub":"abc","email":"a@b.no"}"#).unwrap();
        assert!(!profile.email_verified);
        assert_eq!(profile.verified_email(), None);
    }

    #[test]
    fn test_display_name_from_parts() {
        let profile = ProviderProfile {
            subject: "s".to_string(),
            given_name: Some("Kari".to_string()),
            family_name: Some("Nordmann".to_string()),
            ..Default::default()
        };
        assert_eq!(profile.display_name().as_deref(), Some("Kari Nordmann"));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Kari@Example.NO "), "kari@example.no");
    }

    #[test]
    fn test_token_set_debug_redacts() {
        let tokens = TokenSet {
            access_token: "secret-access".to_string(),
            id_token: "secret-id".to_string(),
            expires_in: Some(300),
            scope: None,
        };
        let debug = format!("{tokens:?}");
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-id"));
    }
}
