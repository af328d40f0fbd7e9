use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::candidates::CandidateRecord;
use crate::utils::crypto::{create_hs256_jwt, verify_hs256_jwt};

#[derive(Debug)]
pub enum SessionError {
    Signing(String),
    InvalidToken(String),
    WrongIssuer,
    Expired,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signing(msg) => write!(f, "Failed to sign session token: {msg}"),
            Self::InvalidToken(msg) => write!(f, "Invalid session token: {msg}"),
            Self::WrongIssuer => write!(f, "Session token was issued by another service"),
            Self::Expired => write!(f, "Session has expired"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Claims carried by a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub iss: String,
    /// Candidate id
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub provider_subject: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub provider_verified: bool,
}

impl SessionClaims {
    #[must_use]
    pub fn candidate_id(&self) -> &str {
        &self.sub
    }
}

/// A freshly signed session
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub claims: SessionClaims,
}

/// Signs and verifies session tokens
#[derive(Clone)]
pub struct SessionIssuer {
    secret: Vec<u8>,
    issuer: String,
    lifetime: Duration,
}

impl SessionIssuer {
    #[must_use]
    pub fn new(secret: &[u8], issuer: String, lifetime_hours: u64) -> Self {
        Self {
            secret: secret.to_vec(),
            issuer,
            lifetime: Duration::hours(i64::try_from(lifetime_hours).unwrap_or(8)),
        }
    }

    /// Session lifetime, for aligning the cookie's expiry
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Issue a session bound to a resolved candidate
    ///
    /// `provider_subject` and `verified_email` come from the identity just
    /// verified and fill in whatever the record does not hold.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be signed
    pub fn issue(
        &self,
        candidate: &CandidateRecord,
        provider_subject: &str,
        verified_email: &str,
    ) -> Result<IssuedSession, SessionError> {
        let now = Utc::now();
        let claims = SessionClaims {
            iss: self.issuer.clone(),
            sub: candidate.id.clone(),
            iat: now.timestamp(),
            exp: (now + self.lifetime).timestamp(),
            provider_subject: candidate
                .provider_subject
                .clone()
                .unwrap_or_else(|| provider_subject.to_string()),
            email: candidate
                .email
                .clone()
                .unwrap_or_else(|| verified_email.to_string()),
            name: candidate.name.clone(),
            phone: candidate.phone.clone(),
            provider_verified: candidate.provider_verified,
        };

        let payload =
            serde_json::to_value(&claims).map_err(|e| SessionError::Signing(e.to_string()))?;
        let token = create_hs256_jwt(&payload, &self.secret)
            .map_err(|e| SessionError::Signing(e.to_string()))?;

        Ok(IssuedSession { token, claims })
    }

    /// Verify a session token's signature, issuer and expiry
    ///
    /// # Errors
    ///
    /// Returns an error if the token is forged, foreign or expired
    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let payload = verify_hs256_jwt(token, &self.secret)
            .map_err(|e| SessionError::InvalidToken(e.to_string()))?;
        let claims: SessionClaims = serde_json::from_value(payload)
            .map_err(|e| SessionError::InvalidToken(e.to_string()))?;

        if claims.iss != self.issuer {
            return Err(SessionError::WrongIssuer);
        }
        if claims.exp <= Utc::now().timestamp() {
            return Err(SessionError::Expired);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::legacy_candidate;

    fn issuer() -> SessionIssuer {
        SessionIssuer::new(b"test-session-secret-0123456789ab", "talentgate".to_string(), 8)
    }

    fn verified_candidate() -> CandidateRecord {
        let mut candidate = legacy_candidate("cand-1", "kari@example.no");
        candidate.provider_subject = Some("sub-1".to_string());
        candidate.provider_verified = true;
        candidate
    }

    #[test]
    fn test_issue_then_verify() {
        let issuer = issuer();
        let session = issuer
            .issue(&verified_candidate(), "sub-1", "kari@example.no")
            .unwrap();

        let claims = issuer.verify(&session.token).unwrap();
        assert_eq!(claims.candidate_id(), "cand-1");
        assert_eq!(claims.provider_subject, "sub-1");
        assert!(claims.provider_verified);
        assert_eq!(claims.exp - claims.iat, 8 * 3600);
    }

    #[test]
    fn test_phone_is_omitted_when_absent() {
        let session = issuer()
            .issue(&verified_candidate(), "sub-1", "kari@example.no")
            .unwrap();
        let payload = session.token.split('.').nth(1).unwrap();
        let json = String::from_utf8(
            base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, payload)
                .unwrap(),
        )
        .unwrap();
        assert!(!json.contains("phone"));
    }

    #[test]
    fn test_other_secret_is_rejected() {
        let session = issuer()
            .issue(&verified_candidate(), "sub-1", "kari@example.no")
            .unwrap();
        let other = SessionIssuer::new(b"another-secret-another-secret-xx", "talentgate".to_string(), 8);

        assert!(matches!(
            other.verify(&session.token),
            Err(SessionError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_foreign_issuer_is_rejected() {
        let secret = b"test-session-secret-0123456789ab";
        let foreign = SessionIssuer::new(secret, "someone-else".to_string(), 8);
        let session = foreign
            .issue(&verified_candidate(), "sub-1", "kari@example.no")
            .unwrap();

        assert!(matches!(
            issuer().verify(&session.token),
            Err(SessionError::WrongIssuer)
        ));
    }

    #[test]
    fn test_expired_session_is_rejected() {
        let expired = SessionIssuer::new(b"test-session-secret-0123456789ab", "talentgate".to_string(), 0);
        let session = expired
            .issue(&verified_candidate(), "sub-1", "kari@example.no")
            .unwrap();

        assert!(matches!(expired.verify(&session.token), Err(SessionError::Expired)));
    }

    #[test]
    fn test_verified_email_fills_missing_record_email() {
        let mut candidate = verified_candidate();
        candidate.email = None;
        let session = issuer()
            .issue(&candidate, "sub-1", "kari@example.no")
            .unwrap();
        assert_eq!(session.claims.email, "kari@example.no");
    }
}
