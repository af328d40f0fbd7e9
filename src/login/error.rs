// Classification of every way a login attempt can fail.
// User-facing text comes from fixed tables; provider text never reaches the user.

/// A failed login attempt, classified for the response layer
#[derive(Debug)]
pub enum LoginError {
    /// A required callback parameter was absent
    MissingParameter(&'static str),
    /// The callback query could not be parsed (duplicated or malformed parameters)
    InvalidParameter(String),
    /// Pending state unknown: expired, already used or forged
    StateExpired,
    /// The provider reported an OAuth error on the callback
    Provider {
        code: String,
        description: Option<String>,
    },
    /// The identity token or profile could not be trusted
    Verification(String),
    EmailNotVerified,
    /// Candidate lookup or create failed
    Resolution(String),
    /// The email belongs to a candidate linked to another provider identity
    AccountConflict(String),
    /// Provider unreachable, timed out or refused the exchange
    ProviderUnavailable(String),
    StateStoreUnavailable(String),
}

impl std::fmt::Display for LoginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingParameter(name) => write!(f, "Missing callback parameter '{name}'"),
            Self::InvalidParameter(cause) => write!(f, "Invalid callback query: {cause}"),
            Self::StateExpired => write!(f, "Pending login state is expired or unknown"),
            Self::Provider { code, description } => write!(
                f,
                "Provider returned error '{code}': {}",
                description.as_deref().unwrap_or("no description")
            ),
            Self::Verification(cause) => write!(f, "Identity verification failed: {cause}"),
            Self::EmailNotVerified => write!(f, "Provider email is missing or unverified"),
            Self::Resolution(cause) => write!(f, "Candidate resolution failed: {cause}"),
            Self::AccountConflict(candidate_id) => write!(
                f,
                "Candidate {candidate_id} is linked to a different provider identity"
            ),
            Self::ProviderUnavailable(cause) => write!(f, "Provider unavailable: {cause}"),
            Self::StateStoreUnavailable(cause) => {
                write!(f, "Pending-state store unavailable: {cause}")
            }
        }
    }
}

impl std::error::Error for LoginError {}

const GENERIC_FAILURE: &str = "Login failed. Please try again.";

/// Known provider error codes and what the user is told
const PROVIDER_MESSAGES: &[(&str, &str)] = &[
    (
        "access_denied",
        "You cancelled the login. You can try again whenever you are ready.",
    ),
    (
        "login_required",
        "Please log in with the identity provider to continue.",
    ),
    (
        "consent_required",
        "We need your consent to share your name, email and phone number to log you in.",
    ),
    (
        "interaction_required",
        "The identity provider needs you to complete the login in the app.",
    ),
    (
        "invalid_request",
        "The login request was rejected. Please try again.",
    ),
    (
        "invalid_scope",
        "The login request was rejected. Please try again.",
    ),
    (
        "unauthorized_client",
        "Login with this provider is currently not available. Please contact us.",
    ),
    (
        "server_error",
        "The identity provider had a problem. Please try again in a few minutes.",
    ),
    (
        "temporarily_unavailable",
        "The identity provider is temporarily unavailable. Please try again in a few minutes.",
    ),
];

/// User-facing message for a provider error code, generic when unmapped
#[must_use]
pub fn provider_error_message(code: &str) -> &'static str {
    PROVIDER_MESSAGES
        .iter()
        .find(|(known, _)| *known == code)
        .map_or(GENERIC_FAILURE, |(_, message)| message)
}

impl LoginError {
    /// Stable code for the login page's `error` parameter
    #[must_use]
    pub fn error_code(&self) -> &str {
        match self {
            Self::MissingParameter(_) => "missing_parameter",
            Self::InvalidParameter(_) => "invalid_parameter",
            Self::StateExpired => "session_expired",
            Self::Provider { code, .. } => {
                if PROVIDER_MESSAGES.iter().any(|(known, _)| known == code) {
                    code
                } else {
                    "provider_error"
                }
            }
            Self::Verification(_) => "verification_failed",
            Self::EmailNotVerified => "email_not_verified",
            Self::Resolution(_) => "login_failed",
            Self::AccountConflict(_) => "account_conflict",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::StateStoreUnavailable(_) => "temporarily_unavailable",
        }
    }

    /// Fixed, human-readable message for the user
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MissingParameter(_) => {
                "The login response was incomplete. Please start the login again."
            }
            Self::InvalidParameter(_) => {
                "The login response was not understood. Please start the login again."
            }
            Self::StateExpired => "Your login session expired. Please start the login again.",
            Self::Provider { code, .. } => provider_error_message(code),
            Self::Verification(_) => "We could not verify your identity. Please try again.",
            Self::EmailNotVerified => {
                "Your email address is not verified with the identity provider. Verify it there and try again."
            }
            Self::AccountConflict(_) => {
                "This email address is already linked to another login. Please contact us for help."
            }
            Self::ProviderUnavailable(_) => {
                "The identity provider did not respond. Please try again in a few minutes."
            }
            Self::StateStoreUnavailable(_) => {
                "Login is temporarily unavailable. Please try again in a few minutes."
            }
            Self::Resolution(_) => GENERIC_FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapped_provider_code() {
        let err = LoginError::Provider {
            code: "access_denied".to_string(),
            description: Some("User pressed cancel".to_string()),
        };
        assert_eq!(err.error_code(), "access_denied");
        assert!(err.user_message().contains("cancelled"));
    }

    #[test]
    fn test_unmapped_provider_code_falls_back() {
        let err = LoginError::Provider {
            code: "<script>".to_string(),
            description: Some("raw provider text".to_string()),
        };
        assert_eq!(err.error_code(), "provider_error");
        assert_eq!(err.user_message(), GENERIC_FAILURE);
    }

    #[test]
    fn test_detail_never_reaches_user_message() {
        let err = LoginError::Verification("Claim 'aud' validation failed".to_string());
        assert!(!err.user_message().contains("aud"));
        assert!(err.to_string().contains("aud"));
    }

    #[test]
    fn test_every_table_entry_resolves() {
        for (code, message) in PROVIDER_MESSAGES {
            assert_eq!(provider_error_message(code), *message);
        }
    }
}
