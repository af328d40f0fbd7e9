// Identity token verification against the provider's published key set
// Supports RS256 and ES256 signatures with a single-flight JWKS cache

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use p256::ecdsa::{Signature as EcdsaSignature, VerifyingKey as EcdsaVerifyingKey};
use rsa::{pkcs1v15::VerifyingKey, RsaPublicKey};
use sha2::Sha256;

use crate::models::IdentityToken;
use crate::settings::JwtValidationConfig;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug)]
pub enum JwtValidationError {
    KeyNotFound(String),
    SignatureInvalid,
    ClaimValidationFailed {
        claim: String,
        expected: String,
        actual: String,
    },
    MissingClaim(String),
    NonceMismatch,
    SubjectMismatch,
    JwksFetchFailed(String),
    UnsupportedAlgorithm(String),
    TokenExpired,
    TokenNotYetValid,
    InvalidToken(String),
    KeyDecodingFailed(String),
    CryptographicError(String),
}

impl std::fmt::Display for JwtValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyNotFound(kid) => write!(f, "Key not found: {kid}"),
            Self::SignatureInvalid => write!(f, "JWT signature verification failed"),
            Self::ClaimValidationFailed {
                claim,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Claim '{claim}' validation failed: expected '{expected}', got '{actual}'"
                )
            }
            Self::MissingClaim(claim) => write!(f, "Required claim '{claim}' is missing"),
            Self::NonceMismatch => write!(f, "Nonce does not match the pending login"),
            Self::SubjectMismatch => {
                write!(f, "Profile subject does not match the identity token subject")
            }
            Self::JwksFetchFailed(msg) => write!(f, "Failed to fetch JWKS: {msg}"),
            Self::UnsupportedAlgorithm(alg) => write!(f, "Unsupported algorithm: {alg}"),
            Self::TokenExpired => write!(f, "Token has expired"),
            Self::TokenNotYetValid => write!(f, "Token is not yet valid"),
            Self::InvalidToken(msg) => write!(f, "Invalid token: {msg}"),
            Self::KeyDecodingFailed(msg) => write!(f, "Failed to decode key: {msg}"),
            Self::CryptographicError(msg) => write!(f, "Cryptographic error: {msg}"),
        }
    }
}

impl std::error::Error for JwtValidationError {}

// ============================================================================
// JWT Structures
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub kid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JwtClaims {
    pub iss: Option<String>,            // Issuer
    pub aud: Option<serde_json::Value>, // Audience (can be string or array)
    pub exp: Option<i64>,               // Expiration time
    pub nbf: Option<i64>,               // Not before
    pub iat: Option<i64>,               // Issued at
    pub sub: Option<String>,            // Subject
    pub azp: Option<String>,            // Authorized party
    pub nonce: Option<String>,
}

// ============================================================================
// JWKS Structures
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonWebKey {
    pub kty: String, // Key type (RSA, EC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>, // "sig" for signing

    // RSA keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    // EC keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// Pick the verification key for a token header's `kid`.
/// A token without `kid` is only accepted when the set holds exactly one key.
fn select_key<'a>(keys: &'a [JsonWebKey], kid: Option<&str>) -> Option<&'a JsonWebKey> {
    let signing_keys = || {
        keys.iter()
            .filter(|key| key.key_use.as_deref().unwrap_or("sig") == "sig")
    };
    match kid {
        Some(kid) => signing_keys().find(|key| key.kid.as_deref() == Some(kid)),
        None => {
            let mut candidates = signing_keys();
            let only = candidates.next()?;
            candidates.next().is_none().then_some(only)
        }
    }
}

// ============================================================================
// Key Set Source
// ============================================================================

/// Where the published key set comes from
#[async_trait]
pub trait KeySetSource: Send + Sync {
    /// Fetch the current key set
    ///
    /// # Errors
    ///
    /// Returns an error if the key set cannot be retrieved or parsed
    async fn fetch_key_set(&self) -> Result<JsonWebKeySet, JwtValidationError>;
}

/// Fetches the key set from the provider's `jwks_uri`
pub struct HttpKeySetSource {
    http: reqwest::Client,
    jwks_uri: String,
}

impl HttpKeySetSource {
    #[must_use]
    pub fn new(http: reqwest::Client, jwks_uri: String) -> Self {
        Self { http, jwks_uri }
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    async fn fetch_key_set(&self) -> Result<JsonWebKeySet, JwtValidationError> {
        debug!("🔑 Fetching JWKS from {}", self.jwks_uri);

        let response = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| JwtValidationError::JwksFetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(JwtValidationError::JwksFetchFailed(format!(
                "JWKS request failed with status: {}",
                response.status()
            )));
        }

        response.json::<JsonWebKeySet>().await.map_err(|e| {
            JwtValidationError::JwksFetchFailed(format!("Failed to parse JWKS: {e}"))
        })
    }
}

// ============================================================================
// JWKS Cache
// ============================================================================

struct CachedKeySet {
    keys: Vec<JsonWebKey>,
    fetched_at: Instant,
}

/// Read-mostly cache of the provider's signing keys
///
/// Readers share an `RwLock`. Refreshes are serialized by a separate mutex,
/// and every caller re-checks the cache after acquiring it, so a stampede of
/// cache misses results in one fetch.
pub struct JwksCache {
    source: Arc<dyn KeySetSource>,
    cached: RwLock<Option<CachedKeySet>>,
    // Guards refreshes; holds the time of the last fetch attempt
    refresh: Mutex<Option<Instant>>,
    cache_duration: Duration,
    stale_grace: Duration,
    min_refresh_interval: Duration,
}

impl JwksCache {
    #[must_use]
    pub fn new(
        source: Arc<dyn KeySetSource>,
        cache_duration: Duration,
        stale_grace: Duration,
        min_refresh_interval: Duration,
    ) -> Self {
        Self {
            source,
            cached: RwLock::new(None),
            refresh: Mutex::new(None),
            cache_duration,
            stale_grace,
            min_refresh_interval,
        }
    }

    #[must_use]
    pub fn from_config(source: Arc<dyn KeySetSource>, config: &JwtValidationConfig) -> Self {
        Self::new(
            source,
            Duration::from_secs(config.cache_duration_seconds),
            Duration::from_secs(config.stale_grace_seconds),
            Duration::from_secs(config.min_refresh_interval_seconds),
        )
    }

    /// Fetch the key set now, ignoring the cache state
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails; the previous cache is kept
    pub async fn warm_up(&self) -> Result<usize, JwtValidationError> {
        let mut last_refresh = self.refresh.lock().await;
        *last_refresh = Some(Instant::now());
        let key_set = self.source.fetch_key_set().await?;
        let count = key_set.keys.len();
        self.store(key_set).await;
        Ok(count)
    }

    /// Get the verification key for a token's `kid`
    ///
    /// # Errors
    ///
    /// Returns an error if no usable key set is available or the key is not in it
    pub async fn get_key(&self, kid: Option<&str>) -> Result<JsonWebKey, JwtValidationError> {
        if let Some(key) = self.lookup(kid, self.cache_duration).await {
            return Ok(key);
        }

        let mut last_refresh = self.refresh.lock().await;

        // Another caller may have refreshed while we waited for the lock
        if let Some(key) = self.lookup(kid, self.cache_duration).await {
            return Ok(key);
        }

        let usable_window = self.cache_duration + self.stale_grace;
        if last_refresh.is_some_and(|at| at.elapsed() < self.min_refresh_interval) {
            debug!("JWKS refreshed recently, not fetching again");
            return self
                .lookup(kid, usable_window)
                .await
                .ok_or_else(|| JwtValidationError::KeyNotFound(kid_label(kid)));
        }

        *last_refresh = Some(Instant::now());
        match self.source.fetch_key_set().await {
            Ok(key_set) => {
                let key = select_key(&key_set.keys, kid).cloned();
                self.store(key_set).await;
                key.ok_or_else(|| JwtValidationError::KeyNotFound(kid_label(kid)))
            }
            Err(e) => {
                if let Some(key) = self.lookup(kid, usable_window).await {
                    warn!("⚠️ JWKS refresh failed, using stale key set: {e}");
                    return Ok(key);
                }
                Err(e)
            }
        }
    }

    async fn lookup(&self, kid: Option<&str>, max_age: Duration) -> Option<JsonWebKey> {
        let cached = self.cached.read().await;
        let key_set = cached.as_ref()?;
        if key_set.fetched_at.elapsed() >= max_age {
            return None;
        }
        select_key(&key_set.keys, kid).cloned()
    }

    async fn store(&self, key_set: JsonWebKeySet) {
        info!("💾 Cached {} signing keys", key_set.keys.len());
        *self.cached.write().await = Some(CachedKeySet {
            keys: key_set.keys,
            fetched_at: Instant::now(),
        });
    }
}

fn kid_label(kid: Option<&str>) -> String {
    kid.unwrap_or("<none>").to_string()
}

// ============================================================================
// JWT Validator
// ============================================================================

#[derive(Clone)]
pub struct JwtValidator {
    cache: Arc<JwksCache>,
    expected_issuer: String,
    expected_audience: String,
    clock_skew: i64,
}

impl JwtValidator {
    #[must_use]
    pub fn new(
        cache: Arc<JwksCache>,
        expected_issuer: String,
        expected_audience: String,
        clock_skew_seconds: u64,
    ) -> Self {
        Self {
            cache,
            expected_issuer,
            expected_audience,
            clock_skew: i64::try_from(clock_skew_seconds).unwrap_or(60),
        }
    }

    /// Build a validator for the provider's issuer and this client's id,
    /// honoring any overrides in the validation config
    #[must_use]
    pub fn from_config(
        cache: Arc<JwksCache>,
        config: &JwtValidationConfig,
        issuer: &str,
        client_id: &str,
    ) -> Self {
        Self::new(
            cache,
            config
                .expected_issuer
                .clone()
                .unwrap_or_else(|| issuer.to_string()),
            config
                .expected_audience
                .clone()
                .unwrap_or_else(|| client_id.to_string()),
            config.clock_skew_seconds,
        )
    }

    /// Validate an identity token and return its trusted claims
    ///
    /// # Errors
    /// Returns error if token is malformed, signature verification fails, or claims validation fails
    pub async fn validate_id_token(
        &self,
        token: &str,
        expected_nonce: Option<&str>,
    ) -> Result<IdentityToken, JwtValidationError> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(JwtValidationError::InvalidToken(
                "Invalid JWT format".to_string(),
            ));
        }

        let header = Self::decode_jwt_header(parts[0])?;
        debug!("📋 JWT header: alg={}, kid={:?}", header.alg, header.kid);

        // Only asymmetric algorithms; `none` and HMAC never reach key lookup
        match header.alg.as_str() {
            "RS256" | "ES256" => {}
            alg => return Err(JwtValidationError::UnsupportedAlgorithm(alg.to_string())),
        }

        let public_key = self.cache.get_key(header.kid.as_deref()).await?;
        Self::verify_signature(parts[0], parts[1], parts[2], &header.alg, &public_key)?;
        debug!("✅ JWT signature verified successfully");

        let claims = Self::decode_jwt_claims(parts[1])?;
        self.validate_claims(claims, expected_nonce, chrono::Utc::now().timestamp())
    }

    /// Decode JWT header from base64
    fn decode_jwt_header(header_b64: &str) -> Result<JwtHeader, JwtValidationError> {
        let header_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|e| {
                JwtValidationError::InvalidToken(format!("Invalid header encoding: {e}"))
            })?;

        serde_json::from_slice(&header_bytes)
            .map_err(|e| JwtValidationError::InvalidToken(format!("Invalid header JSON: {e}")))
    }

    /// Decode JWT claims from base64
    fn decode_jwt_claims(claims_b64: &str) -> Result<JwtClaims, JwtValidationError> {
        let claims_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|e| {
                JwtValidationError::InvalidToken(format!("Invalid claims encoding: {e}"))
            })?;

        serde_json::from_slice(&claims_bytes)
            .map_err(|e| JwtValidationError::InvalidToken(format!("Invalid claims JSON: {e}")))
    }

    /// Verify JWT signature cryptographically
    fn verify_signature(
        header_b64: &str,
        claims_b64: &str,
        signature_b64: &str,
        algorithm: &str,
        public_key: &JsonWebKey,
    ) -> Result<(), JwtValidationError> {
        if let Some(key_alg) = public_key.alg.as_deref() {
            if key_alg != algorithm {
                return Err(JwtValidationError::ClaimValidationFailed {
                    claim: "alg".to_string(),
                    expected: key_alg.to_string(),
                    actual: algorithm.to_string(),
                });
            }
        }

        let signing_input = format!("{header_b64}.{claims_b64}");
        let signature_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| {
                JwtValidationError::InvalidToken(format!("Invalid signature encoding: {e}"))
            })?;

        match algorithm {
            "RS256" => Self::verify_rsa_signature(&signing_input, &signature_bytes, public_key),
            "ES256" => Self::verify_ecdsa_signature(&signing_input, &signature_bytes, public_key),
            alg => Err(JwtValidationError::UnsupportedAlgorithm(alg.to_string())),
        }
    }

    /// Verify an RS256 (RSASSA-PKCS1-v1_5 with SHA-256) signature
    fn verify_rsa_signature(
        signing_input: &str,
        signature: &[u8],
        public_key: &JsonWebKey,
    ) -> Result<(), JwtValidationError> {
        use rsa::signature::Verifier;

        if public_key.kty != "RSA" {
            return Err(JwtValidationError::KeyDecodingFailed(format!(
                "RS256 requires an RSA key, got {}",
                public_key.kty
            )));
        }
        let n = public_key.n.as_ref().ok_or_else(|| {
            JwtValidationError::KeyDecodingFailed("Missing RSA modulus (n)".to_string())
        })?;
        let e = public_key.e.as_ref().ok_or_else(|| {
            JwtValidationError::KeyDecodingFailed("Missing RSA exponent (e)".to_string())
        })?;

        let n_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(n)
            .map_err(|e| {
                JwtValidationError::KeyDecodingFailed(format!("Invalid modulus encoding: {e}"))
            })?;
        let e_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(e)
            .map_err(|e| {
                JwtValidationError::KeyDecodingFailed(format!("Invalid exponent encoding: {e}"))
            })?;

        let rsa_key = RsaPublicKey::new(
            rsa::BigUint::from_bytes_be(&n_bytes),
            rsa::BigUint::from_bytes_be(&e_bytes),
        )
        .map_err(|e| JwtValidationError::KeyDecodingFailed(format!("Invalid RSA key: {e}")))?;

        let signature = rsa::pkcs1v15::Signature::try_from(signature).map_err(|e| {
            JwtValidationError::CryptographicError(format!("Invalid signature format: {e}"))
        })?;

        VerifyingKey::<Sha256>::new(rsa_key)
            .verify(signing_input.as_bytes(), &signature)
            .map_err(|_| JwtValidationError::SignatureInvalid)
    }

    /// Verify an ES256 (P-256, SHA-256) signature in JWS `r || s` form
    fn verify_ecdsa_signature(
        signing_input: &str,
        signature: &[u8],
        public_key: &JsonWebKey,
    ) -> Result<(), JwtValidationError> {
        use p256::ecdsa::signature::Verifier;

        if public_key.kty != "EC" || public_key.crv.as_deref() != Some("P-256") {
            return Err(JwtValidationError::KeyDecodingFailed(
                "ES256 requires an EC P-256 key".to_string(),
            ));
        }
        let x = public_key.x.as_ref().ok_or_else(|| {
            JwtValidationError::KeyDecodingFailed("Missing ECDSA x coordinate".to_string())
        })?;
        let y = public_key.y.as_ref().ok_or_else(|| {
            JwtValidationError::KeyDecodingFailed("Missing ECDSA y coordinate".to_string())
        })?;

        let x_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(x)
            .map_err(|e| {
                JwtValidationError::KeyDecodingFailed(format!("Invalid x coordinate: {e}"))
            })?;
        let y_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(y)
            .map_err(|e| {
                JwtValidationError::KeyDecodingFailed(format!("Invalid y coordinate: {e}"))
            })?;

        // SEC1 uncompressed point: 0x04 || x || y
        let mut point_bytes = Vec::with_capacity(1 + x_bytes.len() + y_bytes.len());
        point_bytes.push(0x04);
        point_bytes.extend_from_slice(&x_bytes);
        point_bytes.extend_from_slice(&y_bytes);

        let verifying_key = EcdsaVerifyingKey::from_sec1_bytes(&point_bytes)
            .map_err(|e| JwtValidationError::KeyDecodingFailed(format!("Invalid ECDSA key: {e}")))?;

        let signature = EcdsaSignature::from_slice(signature).map_err(|e| {
            JwtValidationError::CryptographicError(format!("Invalid signature format: {e}"))
        })?;

        verifying_key
            .verify(signing_input.as_bytes(), &signature)
            .map_err(|_| JwtValidationError::SignatureInvalid)
    }

    /// Validate JWT claims of a token whose signature has already been checked
    fn validate_claims(
        &self,
        claims: JwtClaims,
        expected_nonce: Option<&str>,
        now: i64,
    ) -> Result<IdentityToken, JwtValidationError> {
        let expires_at = Self::validate_expiration_claims(&claims, now, self.clock_skew)?;
        let issuer = self.validate_issuer_claim(&claims)?;
        let audience = self.validate_audience_claim(&claims)?;
        Self::validate_nonce_claim(&claims, expected_nonce)?;

        let subject = claims
            .sub
            .filter(|sub| !sub.is_empty())
            .ok_or_else(|| JwtValidationError::MissingClaim("sub".to_string()))?;

        Ok(IdentityToken {
            subject,
            issuer,
            audience,
            issued_at: claims.iat,
            expires_at,
            nonce: claims.nonce,
        })
    }

    /// Validate expiration, not-before and issued-at claims
    fn validate_expiration_claims(
        claims: &JwtClaims,
        now: i64,
        clock_skew: i64,
    ) -> Result<i64, JwtValidationError> {
        let exp = claims
            .exp
            .ok_or_else(|| JwtValidationError::MissingClaim("exp".to_string()))?;
        if now > exp.saturating_add(clock_skew) {
            return Err(JwtValidationError::TokenExpired);
        }

        if let Some(nbf) = claims.nbf {
            if now < nbf.saturating_sub(clock_skew) {
                return Err(JwtValidationError::TokenNotYetValid);
            }
        }

        if let Some(iat) = claims.iat {
            if iat > now.saturating_add(clock_skew) {
                return Err(JwtValidationError::TokenNotYetValid);
            }
        }

        Ok(exp)
    }

    /// Validate issuer claim, ignoring a trailing slash on either side
    fn validate_issuer_claim(&self, claims: &JwtClaims) -> Result<String, JwtValidationError> {
        let token_issuer = claims
            .iss
            .as_deref()
            .ok_or_else(|| JwtValidationError::MissingClaim("iss".to_string()))?;

        if normalize_issuer(token_issuer) != normalize_issuer(&self.expected_issuer) {
            return Err(JwtValidationError::ClaimValidationFailed {
                claim: "iss".to_string(),
                expected: self.expected_issuer.clone(),
                actual: token_issuer.to_string(),
            });
        }

        Ok(token_issuer.to_string())
    }

    /// Validate audience claim
    ///
    /// A single audience must be the client id. With several audiences the
    /// client id must be among them and `azp` must name the client id.
    fn validate_audience_claim(&self, claims: &JwtClaims) -> Result<Vec<String>, JwtValidationError> {
        let token_audiences = extract_audiences(claims.aud.as_ref());

        if !token_audiences
            .iter()
            .any(|aud| aud == &self.expected_audience)
        {
            return Err(JwtValidationError::ClaimValidationFailed {
                claim: "aud".to_string(),
                expected: self.expected_audience.clone(),
                actual: format!("{token_audiences:?}"),
            });
        }

        if token_audiences.len() > 1
            && claims.azp.as_deref() != Some(self.expected_audience.as_str())
        {
            return Err(JwtValidationError::ClaimValidationFailed {
                claim: "azp".to_string(),
                expected: self.expected_audience.clone(),
                actual: claims.azp.clone().unwrap_or_default(),
            });
        }

        Ok(token_audiences)
    }

    fn validate_nonce_claim(
        claims: &JwtClaims,
        expected_nonce: Option<&str>,
    ) -> Result<(), JwtValidationError> {
        match expected_nonce {
            Some(expected) if claims.nonce.as_deref() != Some(expected) => {
                Err(JwtValidationError::NonceMismatch)
            }
            _ => Ok(()),
        }
    }
}

/// Issuers compare equal with or without a trailing slash
#[must_use]
pub fn normalize_issuer(issuer: &str) -> &str {
    issuer.trim_end_matches('/')
}

/// Extract audience values from an `aud` claim (string or array)
fn extract_audiences(aud: Option<&serde_json::Value>) -> Vec<String> {
    match aud {
        Some(serde_json::Value::String(single)) => vec![single.clone()],
        Some(serde_json::Value::Array(values)) => values
            .iter()
            .filter_map(|value| value.as_str().map(ToString::to_string))
            .collect(),
        _ => vec![],
    }
}
