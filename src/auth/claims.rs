/// Token Claims
///
/// Payload shared by access and refresh tokens. Both tokens of a pair carry
/// the same `createTime`, which is what ties an access token to its session.

use serde::{Deserialize, Serialize};

/// Claim names as they appear on the wire
pub const USER_ID_CLAIM: &str = "userId";
pub const ROLE_IDS_CLAIM: &str = "roleIds";
pub const CREATE_TIME_CLAIM: &str = "createTime";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    /// Comma-separated role identifiers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_ids: Option<String>,
    /// Epoch milliseconds at which the token pair was minted
    pub create_time: i64,
}

impl Claims {
    pub fn new(user_id: impl Into<String>, role_ids: Option<String>, create_time: i64) -> Self {
        Self {
            user_id: user_id.into(),
            role_ids,
            create_time,
        }
    }

    /// Role identifiers split out of `role_ids`, blanks dropped
    pub fn roles(&self) -> Vec<String> {
        self.role_ids
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|role| !role.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Claims plus the standard expiry, as serialized into the token body
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TokenPayload {
    #[serde(flatten)]
    pub claims: Claims,
    /// Expiry in epoch seconds, fractional to keep millisecond precision
    pub exp: f64,
}

impl TokenPayload {
    pub fn new(claims: Claims, expires_at_millis: i64) -> Self {
        Self {
            claims,
            exp: expires_at_millis as f64 / 1000.0,
        }
    }

    pub fn expires_at_millis(&self) -> i64 {
        (self.exp * 1000.0).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        let claims = Claims::new("42", Some("1,2".to_string()), 1_700_000_000_000);
        let json = serde_json::to_value(&claims).unwrap();

        assert_eq!(json[USER_ID_CLAIM], "42");
        assert_eq!(json[ROLE_IDS_CLAIM], "1,2");
        assert_eq!(json[CREATE_TIME_CLAIM], 1_700_000_000_000i64);
    }

    #[test]
    fn test_roles_split() {
        let claims = Claims::new("42", Some("admin, editor,,".to_string()), 0);
        assert_eq!(claims.roles(), vec!["admin".to_string(), "editor".to_string()]);

        let claims = Claims::new("42", None, 0);
        assert!(claims.roles().is_empty());
    }

    #[test]
    fn test_missing_role_ids_deserializes() {
        let claims: Claims =
            serde_json::from_str(r#"{"userId":"7","createTime":5}"#).unwrap();
        assert_eq!(claims, Claims::new("7", None, 5));
    }
}
