use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

// A safe target is a site-relative path: exactly one leading slash followed by
// something other than another slash or a backslash.
static SAFE_RELATIVE_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/[^/\\]").unwrap());

// Control characters and invisible code points browsers may strip before
// resolving the Location header.
static SUSPICIOUS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x00-\x1F\x7F-\x9F]|\\|[\u{200E}\u{200F}\u{2060}-\u{2064}\u{2000}-\u{200A}]")
        .unwrap()
});

const MAX_REDIRECT_LENGTH: usize = 2048;

/// Check that a redirect target is a site-relative path (`^/[^/]`)
///
/// Also rejects encoded variants that decode to a protocol-relative or
/// absolute URL, and control characters.
#[must_use]
pub fn is_safe_relative_path(target: &str) -> bool {
    if target.len() > MAX_REDIRECT_LENGTH {
        warn!("Excessively long redirect target: {} characters", target.len());
        return false;
    }

    if !SAFE_RELATIVE_PATH.is_match(target) || SUSPICIOUS_PATTERN.is_match(target) {
        return false;
    }

    // "/%2F/evil.example.com" decodes to a protocol-relative URL
    if let Ok(decoded) = urlencoding::decode(target) {
        if decoded != target
            && (!SAFE_RELATIVE_PATH.is_match(&decoded) || SUSPICIOUS_PATTERN.is_match(&decoded))
        {
            warn!("Encoded open redirect attempt detected: {target}");
            return false;
        }
    }

    true
}

/// Return the target if it is safe, otherwise the fallback
#[must_use]
pub fn sanitize_redirect(target: Option<&str>, fallback: &str) -> String {
    match target {
        Some(target) if is_safe_relative_path(target) => {
            debug!("Validated relative redirect target: {target}");
            target.to_string()
        }
        Some(target) => {
            warn!("Rejected unsafe redirect target, using fallback: {target:?}");
            fallback.to_string()
        }
        None => fallback.to_string(),
    }
}
