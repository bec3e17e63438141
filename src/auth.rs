//! One-time-code checks for the mutating HTTP actions.
//!
//! `/reload` and `/exit` accept an optional `code` parameter. When a shared
//! secret is configured the code must verify against it; when no secret is
//! configured the check is skipped.

use std::sync::Arc;

use thiserror::Error;
use totp_rs::{Algorithm, Secret, TOTP};

/// Digits in a one-time code.
pub const CODE_DIGITS: usize = 6;

/// Seconds per code step.
pub const CODE_STEP: u64 = 30;

/// Steps of clock drift accepted on either side of the current one.
pub const CODE_SKEW: u8 = 1;

/// Errors raised when an action is not authorized.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing verification code")]
    MissingCode,

    #[error("invalid verification code")]
    InvalidCode,

    /// The verifier itself failed (bad secret, clock error).
    #[error("code verification failed: {0}")]
    Verifier(String),
}

/// Verifies one-time codes.
pub trait CodeVerifier: Send + Sync + 'static {
    /// Whether `code` is valid right now.
    fn verify(&self, code: &str) -> Result<bool, AuthError>;
}

/// RFC 6238 time-based codes over a base32 shared secret.
///
/// SHA-1, six digits, 30 second steps, one step of skew. Compatible with
/// common authenticator apps.
pub struct TotpVerifier {
    totp: TOTP,
}

impl TotpVerifier {
    /// Create a verifier for a base32-encoded secret.
    ///
    /// # Errors
    /// Returns `AuthError::Verifier` when the secret is empty or not valid
    /// base32.
    pub fn new(secret: &str) -> Result<Self, AuthError> {
        let encoded: String = secret
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();
        if encoded.is_empty() {
            return Err(AuthError::Verifier("secret is empty".to_string()));
        }

        let bytes = Secret::Encoded(encoded)
            .to_bytes()
            .map_err(|e| AuthError::Verifier(format!("invalid secret: {e:?}")))?;

        Ok(Self {
            totp: TOTP::new_unchecked(Algorithm::SHA1, CODE_DIGITS, CODE_SKEW, CODE_STEP, bytes),
        })
    }

    /// Code for the current time step.
    pub fn current_code(&self) -> Result<String, AuthError> {
        self.totp
            .generate_current()
            .map_err(|e| AuthError::Verifier(e.to_string()))
    }
}

impl CodeVerifier for TotpVerifier {
    fn verify(&self, code: &str) -> Result<bool, AuthError> {
        let code = code.trim();
        if code.len() != CODE_DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(false);
        }
        self.totp
            .check_current(code)
            .map_err(|e| AuthError::Verifier(e.to_string()))
    }
}

impl std::fmt::Debug for TotpVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TotpVerifier").finish_non_exhaustive()
    }
}

/// Gate in front of `/reload` and `/exit`.
#[derive(Clone, Default)]
pub struct ActionGuard {
    verifier: Option<Arc<dyn CodeVerifier>>,
}

impl ActionGuard {
    /// A guard that lets every request through.
    pub fn open() -> Self {
        Self::default()
    }

    pub fn new(verifier: Arc<dyn CodeVerifier>) -> Self {
        Self {
            verifier: Some(verifier),
        }
    }

    /// Build from an optional base32 secret. An absent or blank secret
    /// disables the check.
    pub fn from_secret(secret: Option<&str>) -> Result<Self, AuthError> {
        match secret.map(str::trim).filter(|s| !s.is_empty()) {
            Some(secret) => Ok(Self::new(Arc::new(TotpVerifier::new(secret)?))),
            None => Ok(Self::open()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.verifier.is_some()
    }

    /// Check `code` against the configured secret.
    ///
    /// # Errors
    /// `AuthError::MissingCode` when a secret is configured and no code was
    /// given, `AuthError::InvalidCode` when it does not verify.
    pub fn authorize(&self, code: Option<&str>) -> Result<(), AuthError> {
        let Some(verifier) = &self.verifier else {
            return Ok(());
        };

        let code = code
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::MissingCode)?;

        if verifier.verify(code)? {
            Ok(())
        } else {
            Err(AuthError::InvalidCode)
        }
    }
}

impl std::fmt::Debug for ActionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionGuard")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "JBSWY3DPEHPK3PXP";

    struct FixedVerifier(&'static str);

    impl CodeVerifier for FixedVerifier {
        fn verify(&self, code: &str) -> Result<bool, AuthError> {
            Ok(code == self.0)
        }
    }

    #[test]
    fn test_open_guard_allows_everything() {
        let guard = ActionGuard::open();
        assert!(!guard.is_enabled());
        assert!(guard.authorize(None).is_ok());
        assert!(guard.authorize(Some("garbage")).is_ok());
    }

    #[test]
    fn test_guard_requires_code() {
        let guard = ActionGuard::new(Arc::new(FixedVerifier("123456")));
        assert!(matches!(guard.authorize(None), Err(AuthError::MissingCode)));
        assert!(matches!(guard.authorize(Some("  ")), Err(AuthError::MissingCode)));
        assert!(matches!(
            guard.authorize(Some("000000")),
            Err(AuthError::InvalidCode)
        ));
        assert!(guard.authorize(Some("123456")).is_ok());
    }

    #[test]
    fn test_from_secret() {
        assert!(!ActionGuard::from_secret(None).unwrap().is_enabled());
        assert!(!ActionGuard::from_secret(Some("  ")).unwrap().is_enabled());
        assert!(ActionGuard::from_secret(Some(SECRET)).unwrap().is_enabled());
        assert!(matches!(
            ActionGuard::from_secret(Some("not base32!")),
            Err(AuthError::Verifier(_))
        ));
    }

    #[test]
    fn test_totp_accepts_current_code() {
        let verifier = TotpVerifier::new(SECRET).unwrap();
        let code = verifier.current_code().unwrap();
        assert_eq!(code.len(), CODE_DIGITS);
        assert!(verifier.verify(&code).unwrap());

        let guard = ActionGuard::new(Arc::new(verifier));
        assert!(guard.authorize(Some(&code)).is_ok());
    }

    #[test]
    fn test_totp_rejects_malformed_codes() {
        let verifier = TotpVerifier::new(SECRET).unwrap();
        assert!(!verifier.verify("12345").unwrap());
        assert!(!verifier.verify("abcdef").unwrap());
        assert!(!verifier.verify("1234567").unwrap());
    }

    #[test]
    fn test_totp_secret_is_case_insensitive() {
        let upper = TotpVerifier::new(SECRET).unwrap();
        let lower = TotpVerifier::new(&SECRET.to_lowercase()).unwrap();
        let code = upper.current_code().unwrap();
        assert!(lower.verify(&code).unwrap());
    }
}
