/// JWT Token Encoding and Verification
///
/// Access and refresh tokens are HS256 JWTs signed with separate secrets, so
/// a leaked access secret cannot mint refresh tokens.

use std::fmt;
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{Map, Value};

use crate::auth::claims::{Claims, TokenPayload};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, ConfigError};

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// HMAC key material derived from a base64-encoded secret
#[derive(Clone)]
pub struct TokenSecret {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenSecret {
    pub fn from_base64(secret: &str) -> Result<Self, AppError> {
        let invalid = |e: jsonwebtoken::errors::Error| {
            AppError::Config(ConfigError::InvalidValue(format!(
                "signing secret is not valid base64: {}",
                e
            )))
        };

        Ok(Self {
            encoding: EncodingKey::from_base64_secret(secret).map_err(invalid)?,
            decoding: DecodingKey::from_base64_secret(secret).map_err(invalid)?,
        })
    }
}

impl fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenSecret(..)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

/// The pair of signing secrets, one per token kind
#[derive(Debug, Clone)]
pub struct TokenKeys {
    access: TokenSecret,
    refresh: TokenSecret,
}

impl TokenKeys {
    pub fn from_settings(config: &JwtSettings) -> Result<Self, AppError> {
        if config.access_secret == config.refresh_secret {
            return Err(AppError::Config(ConfigError::InvalidValue(
                "access and refresh secrets must differ".to_string(),
            )));
        }

        Ok(Self {
            access: TokenSecret::from_base64(&config.access_secret)?,
            refresh: TokenSecret::from_base64(&config.refresh_secret)?,
        })
    }

    pub fn secret(&self, kind: TokenKind) -> &TokenSecret {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }
}

/// Sign `claims` into a compact token that expires `ttl` from now.
///
/// `exp` is a fractional NumericDate carrying the full millisecond deadline.
pub fn encode(claims: &Claims, secret: &TokenSecret, ttl: Duration) -> Result<String, AppError> {
    let expires_at = now_millis().saturating_add(ttl.as_millis() as i64);
    let payload = TokenPayload::new(claims.clone(), expires_at);

    jsonwebtoken::encode(&Header::default(), &payload, &secret.encoding)
        .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
}

fn classify(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::InvalidSignature => AuthError::SignatureInvalid,
        ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::MalformedToken,
    }
}

/// Verify the signature and expiry of `token` and return its claims.
pub fn decode(token: &str, secret: &TokenSecret) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    // Expiry is checked below at millisecond resolution with no leeway
    validation.validate_exp = false;
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp"]);

    let data = jsonwebtoken::decode::<TokenPayload>(token, &secret.decoding, &validation)
        .map_err(|e| {
            tracing::debug!(error = %e, "Token rejected by codec");
            classify(e)
        })?;

    if now_millis() >= data.claims.expires_at_millis() {
        return Err(AuthError::Expired);
    }

    Ok(data.claims.claims)
}

/// Read one claim without verifying the signature.
///
/// Only used to find which session to look up before full verification;
/// the value must not be trusted on its own.
pub fn peek_claim(token: &str, name: &str) -> Result<Option<String>, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<Map<String, Value>>(
        token,
        &DecodingKey::from_secret(&[]),
        &validation,
    )
    .map_err(|_| AuthError::MalformedToken)?;

    Ok(match data.claims.get(name) {
        None | Some(Value::Null) => None,
        Some(Value::String(value)) => Some(value.clone()),
        Some(other) => Some(other.to_string()),
    })
}

/// Lenient form of [`peek_claim`]: any failure reads as absent.
pub fn get_claim(token: &str, name: &str) -> Option<String> {
    peek_claim(token, name).ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::{CREATE_TIME_CLAIM, ROLE_IDS_CLAIM, USER_ID_CLAIM};

    fn access_secret() -> TokenSecret {
        TokenSecret::from_base64("bXklMjBuYW1lJTIwaXMlMjBnb29kdGltcA==").unwrap()
    }

    fn refresh_secret() -> TokenSecret {
        TokenSecret::from_base64("JXU3MjMxJXU0RjYwJXU1NTRBJXU1OTBGJXU2OEE2JXU2NUNC").unwrap()
    }

    fn sample_claims() -> Claims {
        Claims::new("1001", Some("1,3".to_string()), now_millis())
    }

    /// Swap one character of the signature segment for a different base64url character.
    fn flip_signature_char(token: &str, offset: usize) -> String {
        let sig_start = token.rfind('.').unwrap() + 1;
        let mut bytes = token.as_bytes().to_vec();
        let at = sig_start + offset;
        bytes[at] = if bytes[at] == b'A' { b'B' } else { b'A' };
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_encode_and_decode_round_trip() {
        let claims = sample_claims();
        let token = encode(&claims, &access_secret(), Duration::from_secs(3000)).unwrap();

        assert_eq!(token.split('.').count(), 3);
        assert_eq!(decode(&token, &access_secret()).unwrap(), claims);
    }

    #[test]
    fn test_round_trip_without_roles() {
        let claims = Claims::new("1002", None, now_millis());
        let token = encode(&claims, &refresh_secret(), Duration::from_secs(60)).unwrap();

        assert_eq!(decode(&token, &refresh_secret()).unwrap(), claims);
    }

    #[test]
    fn test_tampered_signature() {
        let token = encode(&sample_claims(), &access_secret(), Duration::from_secs(60)).unwrap();

        for offset in [0, 10, 20] {
            let tampered = flip_signature_char(&token, offset);
            assert_ne!(tampered, token);
            assert_eq!(
                decode(&tampered, &access_secret()),
                Err(AuthError::SignatureInvalid)
            );
        }
    }

    #[test]
    fn test_wrong_secret() {
        let token = encode(&sample_claims(), &access_secret(), Duration::from_secs(60)).unwrap();
        assert_eq!(
            decode(&token, &refresh_secret()),
            Err(AuthError::SignatureInvalid)
        );
    }

    #[test]
    fn test_expired_token() {
        let token = encode(&sample_claims(), &access_secret(), Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(decode(&token, &access_secret()), Err(AuthError::Expired));
    }

    #[test]
    fn test_sub_second_ttl_is_not_truncated() {
        for _ in 0..50 {
            let claims = sample_claims();
            let token = encode(&claims, &access_secret(), Duration::from_millis(900)).unwrap();
            assert_eq!(decode(&token, &access_secret()), Ok(claims));
        }
    }

    #[test]
    fn test_exp_keeps_milliseconds() {
        let payload = TokenPayload::new(sample_claims(), 1_700_000_000_123);
        assert_eq!(payload.expires_at_millis(), 1_700_000_000_123);

        let json = serde_json::to_string(&payload).unwrap();
        let back: TokenPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.expires_at_millis(), 1_700_000_000_123);
    }

    #[test]
    fn test_malformed_token() {
        for token in ["", "abc", "a.b", "invalid.token.here", "a.b.c.d"] {
            assert_eq!(
                decode(token, &access_secret()),
                Err(AuthError::MalformedToken),
                "token {:?}",
                token
            );
        }
    }

    #[test]
    fn test_peek_reads_without_verifying() {
        let claims = sample_claims();
        let token = encode(&claims, &access_secret(), Duration::from_secs(60)).unwrap();
        let tampered = flip_signature_char(&token, 0);

        assert_eq!(get_claim(&tampered, USER_ID_CLAIM), Some("1001".to_string()));
        assert_eq!(get_claim(&token, ROLE_IDS_CLAIM), Some("1,3".to_string()));
        assert_eq!(
            get_claim(&token, CREATE_TIME_CLAIM),
            Some(claims.create_time.to_string())
        );
        assert_eq!(get_claim(&token, "missing"), None);
    }

    #[test]
    fn test_peek_on_garbage() {
        assert_eq!(peek_claim("garbage", USER_ID_CLAIM), Err(AuthError::MalformedToken));
        assert_eq!(get_claim("garbage", USER_ID_CLAIM), None);
    }

    #[test]
    fn test_keys_must_differ() {
        let config = JwtSettings {
            access_secret: "c2FtZQ==".to_string(),
            refresh_secret: "c2FtZQ==".to_string(),
            access_token_expiry: 3000,
            refresh_token_expiry: 604800,
            session_prefix: "session:refresh:".to_string(),
            session_ttl_policy: crate::configuration::SessionTtlPolicy::Refresh,
        };

        assert!(TokenKeys::from_settings(&config).is_err());
    }

    #[test]
    fn test_invalid_base64_secret() {
        assert!(TokenSecret::from_base64("not base64!!").is_err());
    }
}
