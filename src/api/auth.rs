//! Local credential checks and bearer token inspection

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Minimum password length accepted at registration
pub const MIN_PASSWORD_LEN: usize = 8;

/// Plausibility check only; the service does the real validation
pub fn validate_email(email: &str) -> Result<()> {
    let email = email.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("'{}' is not a valid email address", email)))
    }
}

pub fn validate_login(email: &str, password: &str) -> Result<()> {
    validate_email(email)?;
    if password.is_empty() {
        return Err(Error::Validation("Password is required".to_string()));
    }
    Ok(())
}

pub fn validate_registration(name: &str, email: &str, password: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Validation("Name is required".to_string()));
    }
    validate_email(email)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Expiry claim of a JWT bearer token, if it has one
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    #[derive(Deserialize)]
    struct Claims {
        exp: i64,
    }

    let mut parts = token.split('.');
    let (_, payload, _) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claims.exp, 0)
}

/// Whether the token is expired or will expire within 5 minutes.
///
/// Opaque tokens without an `exp` claim are treated as valid.
pub fn is_token_expired(token: &str) -> bool {
    match token_expiry(token) {
        None => false,
        Some(expires_at) => expires_at - chrono::Duration::minutes(5) < Utc::now(),
    }
}

#[cfg(test)]
pub(crate) fn fake_jwt(expires_at: DateTime<Utc>) -> String {
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{}}}"#, expires_at.timestamp()));
    format!("eyJhbGciOiJIUzI1NiJ9.{}.sig", payload)
}
