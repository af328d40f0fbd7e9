// Cryptographic utilities for generating unguessable tokens and HS256 JWTs

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Generate a cryptographically secure state token
///
/// 24 bytes (192 bits) of entropy, `Base64URL` encoded to 32 characters.
#[must_use]
pub fn generate_csrf_token() -> String {
    generate_nonce(24)
}

/// Generate a cryptographically secure nonce of specified byte length
#[must_use]
pub fn generate_nonce(length: usize) -> String {
    let mut nonce = vec![0u8; length];
    rand::rng().fill_bytes(&mut nonce);
    general_purpose::URL_SAFE_NO_PAD.encode(nonce)
}

/// Create a compact HS256 JWT from JSON claims
///
/// # Errors
///
/// Returns an error if:
/// - JSON serialization fails
/// - The HMAC key is rejected
pub fn create_hs256_jwt(payload: &serde_json::Value, secret: &[u8]) -> Result<String> {
    let header = serde_json::json!({ "alg": "HS256", "typ": "JWT" });

    let header_json = serde_json::to_string(&header).context("Failed to serialize JWT header")?;
    let payload_json =
        serde_json::to_string(payload).context("Failed to serialize JWT payload")?;

    let header_b64 = general_purpose::URL_SAFE_NO_PAD.encode(header_json.as_bytes());
    let payload_b64 = general_purpose::URL_SAFE_NO_PAD.encode(payload_json.as_bytes());

    let message = format!("{header_b64}.{payload_b64}");
    let signature = sign_hmac_sha256(message.as_bytes(), secret)?;
    let signature_b64 = general_purpose::URL_SAFE_NO_PAD.encode(signature);

    Ok(format!("{message}.{signature_b64}"))
}

/// Verify an HS256 JWT and return its decoded payload
///
/// The signature comparison is constant time. Only the signature and the
/// `alg` header are checked here; claim validation is up to the caller.
///
/// # Errors
///
/// Returns an error if the token is malformed, uses another algorithm, or
/// the signature does not match
pub fn verify_hs256_jwt(token: &str, secret: &[u8]) -> Result<serde_json::Value> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(anyhow!("Invalid JWT format"));
    }

    let header_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(parts[0])
        .context("Invalid header encoding")?;
    let header: serde_json::Value =
        serde_json::from_slice(&header_bytes).context("Invalid header JSON")?;
    if header["alg"].as_str() != Some("HS256") {
        return Err(anyhow!("Unexpected JWT algorithm"));
    }

    let signature = general_purpose::URL_SAFE_NO_PAD
        .decode(parts[2])
        .context("Invalid signature encoding")?;

    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret).context("Invalid HMAC key length")?;
    mac.update(format!("{}.{}", parts[0], parts[1]).as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| anyhow!("JWT signature verification failed"))?;

    let payload_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1])
        .context("Invalid payload encoding")?;
    serde_json::from_slice(&payload_bytes).context("Invalid payload JSON")
}

fn sign_hmac_sha256(message: &[u8], secret: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret).context("Invalid HMAC key length")?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}
