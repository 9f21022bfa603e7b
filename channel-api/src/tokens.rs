use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use jwt::{Claims, Header, Token, VerifyWithKey};
use sha2::Sha256;
use uuid::Uuid;

/// Why a session token was rejected. Rejected tokens are logged and dropped
/// by the consumer, never escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionTokenError {
    /// The token is malformed, carries the wrong issuer, or its signature
    /// does not verify against the service key.
    #[error("signature verification failed")]
    InvalidSignature,
    /// The token's expiry is in the past.
    #[error("token expired")]
    Expired,
    /// The token's subject is not the one the event claims.
    #[error("subject mismatch")]
    SubjectMismatch,
}

/// The verified claims of a session token.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionClaims {
    pub subject: Uuid,
    pub issued_at: Option<DateTime<Utc>>,
    pub expiration: Option<DateTime<Utc>>,
}

fn timestamp(secs: u64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs as i64, 0).single()
}

/// Verifies a signed session token against the service key material and an
/// expected subject. Pure: no state, no I/O, the key is passed in.
pub fn verify(
    secret: &str,
    issuer: &str,
    token: &str,
    expected_subject: Uuid,
) -> Result<SessionClaims, SessionTokenError> {
    let key = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| SessionTokenError::InvalidSignature)?;

    let token: Token<Header, Claims, _> = token
        .verify_with_key(&key)
        .map_err(|_| SessionTokenError::InvalidSignature)?;

    let claims = &token.claims().registered;

    if claims.issuer.as_deref() != Some(issuer) {
        return Err(SessionTokenError::InvalidSignature);
    }

    let now = Utc::now();

    let issued_at = claims.issued_at.and_then(timestamp);
    if issued_at.is_some_and(|iat| iat > now) {
        return Err(SessionTokenError::InvalidSignature);
    }

    let not_before = claims.not_before.and_then(timestamp);
    if not_before.is_some_and(|nbf| nbf > now) {
        return Err(SessionTokenError::InvalidSignature);
    }

    let expiration = claims.expiration.and_then(timestamp);
    if expiration.is_some_and(|exp| exp < now) {
        return Err(SessionTokenError::Expired);
    }

    let subject = claims
        .subject
        .as_deref()
        .and_then(|sub| sub.parse::<Uuid>().ok())
        .ok_or(SessionTokenError::SubjectMismatch)?;

    if subject != expected_subject {
        return Err(SessionTokenError::SubjectMismatch);
    }

    Ok(SessionClaims {
        subject,
        issued_at,
        expiration,
    })
}

#[cfg(test)]
pub(crate) fn sign(
    secret: &str,
    issuer: &str,
    subject: Uuid,
    expiration: Option<DateTime<Utc>>,
) -> String {
    use jwt::{RegisteredClaims, SignWithKey};

    let key = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("failed to build key");

    let claims = Claims::new(RegisteredClaims {
        issuer: Some(issuer.to_string()),
        subject: Some(subject.to_string()),
        issued_at: Some(Utc::now().timestamp() as u64),
        expiration: expiration.map(|exp| exp.timestamp() as u64),
        not_before: None,
        audience: None,
        json_web_token_id: None,
    });

    claims.sign_with_key(&key).expect("failed to sign token")
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    const SECRET: &str = "test-secret";
    const ISSUER: &str = "channel-service";

    #[test]
    fn test_verify_valid() {
        let subject = Uuid::new_v4();
        let token = sign(SECRET, ISSUER, subject, Some(Utc::now() + Duration::hours(1)));

        let claims = verify(SECRET, ISSUER, &token, subject).expect("token should verify");
        assert_eq!(claims.subject, subject);
        assert!(claims.expiration.is_some());
    }

    #[test]
    fn test_verify_no_expiry() {
        let subject = Uuid::new_v4();
        let token = sign(SECRET, ISSUER, subject, None);

        let claims = verify(SECRET, ISSUER, &token, subject).expect("token should verify");
        assert_eq!(claims.expiration, None);
    }

    #[test]
    fn test_verify_bad_signature() {
        let subject = Uuid::new_v4();
        let token = sign("other-secret", ISSUER, subject, None);

        assert_eq!(
            verify(SECRET, ISSUER, &token, subject),
            Err(SessionTokenError::InvalidSignature)
        );
    }

    #[test]
    fn test_verify_malformed() {
        assert_eq!(
            verify(SECRET, ISSUER, "not a token", Uuid::new_v4()),
            Err(SessionTokenError::InvalidSignature)
        );
    }

    #[test]
    fn test_verify_wrong_issuer() {
        let subject = Uuid::new_v4();
        let token = sign(SECRET, "someone-else", subject, None);

        assert_eq!(
            verify(SECRET, ISSUER, &token, subject),
            Err(SessionTokenError::InvalidSignature)
        );
    }

    #[test]
    fn test_verify_expired() {
        let subject = Uuid::new_v4();
        let token = sign(SECRET, ISSUER, subject, Some(Utc::now() - Duration::hours(1)));

        assert_eq!(
            verify(SECRET, ISSUER, &token, subject),
            Err(SessionTokenError::Expired)
        );
    }

    #[test]
    fn test_verify_subject_mismatch() {
        let token = sign(SECRET, ISSUER, Uuid::new_v4(), None);

        assert_eq!(
            verify(SECRET, ISSUER, &token, Uuid::new_v4()),
            Err(SessionTokenError::SubjectMismatch)
        );
    }
}
