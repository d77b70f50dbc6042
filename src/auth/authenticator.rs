/// Bearer Token Verification
///
/// An access token is accepted only if it verifies under the access secret
/// and the cached session for its user was minted at the same `createTime`.
/// Deleting or replacing the session record therefore invalidates every
/// access token of the old pair before its own expiry.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::auth::claims::{Claims, USER_ID_CLAIM};
use crate::auth::jwt::{self, TokenKeys, TokenKind};
use crate::auth::session::{cached_create_time, session_key};
use crate::cache::CacheStore;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

/// Authenticated caller
///
/// The token string doubles as credential and identity. Authorization scope
/// is empty; `role_ids` is passed through for downstream checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    #[serde(skip_serializing)]
    pub token: String,
    pub user_id: String,
    pub role_ids: Vec<String>,
    pub create_time: i64,
}

impl Principal {
    fn new(token: &str, claims: Claims) -> Self {
        Self {
            token: token.to_string(),
            role_ids: claims.roles(),
            user_id: claims.user_id,
            create_time: claims.create_time,
        }
    }
}

/// Capability to turn a presented bearer token into a principal
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Principal, AuthError>;
}

#[derive(Debug)]
enum Stage {
    Presented,
    Decoded { user_id: String },
    SignatureChecked { claims: Claims },
    SessionConsistent { claims: Claims },
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Presented => "presented",
            Stage::Decoded { .. } => "decoded",
            Stage::SignatureChecked { .. } => "signature_checked",
            Stage::SessionConsistent { .. } => "session_consistent",
        }
    }
}

pub struct Authenticator {
    store: Arc<dyn CacheStore>,
    keys: TokenKeys,
    prefix: String,
}

impl Authenticator {
    pub fn new(store: Arc<dyn CacheStore>, config: &JwtSettings) -> Result<Self, AppError> {
        Ok(Self {
            store,
            keys: TokenKeys::from_settings(config)?,
            prefix: config.session_prefix.clone(),
        })
    }

    async fn advance(&self, token: &str, stage: Stage) -> Result<Stage, AuthError> {
        match stage {
            // Unverified peek: only used to decide which session to consult
            Stage::Presented => {
                let user_id = jwt::peek_claim(token, USER_ID_CLAIM)?
                    .filter(|id| !id.trim().is_empty())
                    .ok_or(AuthError::UserIdMissing)?;
                Ok(Stage::Decoded { user_id })
            }
            Stage::Decoded { user_id } => {
                let claims = jwt::decode(token, self.keys.secret(TokenKind::Access))?;
                if claims.user_id != user_id {
                    return Err(AuthError::MalformedToken);
                }
                Ok(Stage::SignatureChecked { claims })
            }
            Stage::SignatureChecked { claims } => {
                self.check_session(&claims).await?;
                Ok(Stage::SessionConsistent { claims })
            }
            done @ Stage::SessionConsistent { .. } => Ok(done),
        }
    }

    async fn check_session(&self, claims: &Claims) -> Result<(), AuthError> {
        let key = session_key(&self.prefix, &claims.user_id);
        let cached = self
            .store
            .get(&key)
            .await
            .map_err(|e| {
                tracing::error!(user_id = %claims.user_id, error = %e, "Session store lookup failed");
                AuthError::CacheUnavailable
            })?
            .ok_or(AuthError::RefreshTokenMissing)?;

        match cached_create_time(&cached) {
            Some(create_time) if create_time == claims.create_time => Ok(()),
            _ => Err(AuthError::RefreshMismatch),
        }
    }
}

#[async_trait]
impl TokenVerifier for Authenticator {
    async fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let mut stage = Stage::Presented;
        loop {
            let current = stage.name();
            stage = match self.advance(token, stage).await {
                Ok(Stage::SessionConsistent { claims }) => {
                    tracing::debug!(user_id = %claims.user_id, "Token authenticated");
                    return Ok(Principal::new(token, claims));
                }
                Ok(next) => next,
                Err(e) => {
                    tracing::warn!(stage = current, kind = e.kind(), "Token rejected");
                    return Err(e);
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::Claims;
    use crate::auth::jwt::now_millis;
    use crate::auth::session::SessionManager;
    use crate::cache::{Expiry, InMemoryCacheStore, SetOp};
    use crate::configuration::SessionTtlPolicy;
    use crate::error::CacheError;
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;

    fn test_config() -> JwtSettings {
        JwtSettings {
            access_secret: "YWNjZXNzLXNlY3JldC1mb3ItdGVzdHM=".to_string(),
            refresh_secret: "cmVmcmVzaC1zZWNyZXQtZm9yLXRlc3Rz".to_string(),
            access_token_expiry: 3000,
            refresh_token_expiry: 604800,
            session_prefix: "session:refresh:".to_string(),
            session_ttl_policy: SessionTtlPolicy::Refresh,
        }
    }

    fn setup(store: Arc<dyn CacheStore>) -> (SessionManager, Authenticator) {
        let config = test_config();
        (
            SessionManager::new(store.clone(), &config).unwrap(),
            Authenticator::new(store, &config).unwrap(),
        )
    }

    /// Store whose every call fails as if Redis were unreachable
    struct DownStore;

    fn down() -> CacheError {
        CacheError::Unavailable("connection refused".to_string())
    }

    #[async_trait]
    impl CacheStore for DownStore {
        async fn expire(&self, _: &str, _: Duration) -> Result<bool, CacheError> { Err(down()) }
        async fn expiry(&self, _: &str) -> Result<Expiry, CacheError> { Err(down()) }
        async fn delete(&self, _: &[&str]) -> Result<usize, CacheError> { Err(down()) }
        async fn keys_with_prefix(&self, _: &[&str]) -> Result<HashSet<String>, CacheError> { Err(down()) }
        async fn get(&self, _: &str) -> Result<Option<String>, CacheError> { Err(down()) }
        async fn set(&self, _: &str, _: &str, _: Duration) -> Result<(), CacheError> { Err(down()) }
        async fn set_keep_ttl(&self, _: &str, _: &str) -> Result<bool, CacheError> { Err(down()) }
        async fn increment(&self, _: &str, _: i64) -> Result<i64, CacheError> { Err(down()) }
        async fn decrement(&self, _: &str, _: i64) -> Result<i64, CacheError> { Err(down()) }
        async fn hget(&self, _: &str, _: &str) -> Result<Option<String>, CacheError> { Err(down()) }
        async fn hmget(&self, _: &str) -> Result<HashMap<String, String>, CacheError> { Err(down()) }
        async fn hset(&self, _: &str, _: &str, _: &str, _: Duration) -> Result<(), CacheError> { Err(down()) }
        async fn hmset(&self, _: &str, _: &HashMap<String, String>, _: Duration) -> Result<(), CacheError> { Err(down()) }
        async fn hdel(&self, _: &str, _: &[&str]) -> Result<usize, CacheError> { Err(down()) }
        async fn has_field(&self, _: &str, _: &str) -> Result<bool, CacheError> { Err(down()) }
        async fn hincrement(&self, _: &str, _: &str, _: i64) -> Result<i64, CacheError> { Err(down()) }
        async fn hincrement_float(&self, _: &str, _: &str, _: f64) -> Result<f64, CacheError> { Err(down()) }
        async fn members(&self, _: &str) -> Result<HashSet<String>, CacheError> { Err(down()) }
        async fn is_member(&self, _: &str, _: &str) -> Result<bool, CacheError> { Err(down()) }
        async fn add(&self, _: &str, _: &[&str], _: Duration) -> Result<usize, CacheError> { Err(down()) }
        async fn remove(&self, _: &str, _: &[&str]) -> Result<usize, CacheError> { Err(down()) }
        async fn set_size(&self, _: &str) -> Result<usize, CacheError> { Err(down()) }
        async fn set_algebra(&self, _: SetOp, _: &str, _: &[&str]) -> Result<HashSet<String>, CacheError> { Err(down()) }
        async fn range(&self, _: &str, _: i64, _: i64) -> Result<Vec<String>, CacheError> { Err(down()) }
        async fn list_size(&self, _: &str) -> Result<usize, CacheError> { Err(down()) }
        async fn index_of(&self, _: &str, _: i64) -> Result<Option<String>, CacheError> { Err(down()) }
        async fn push_right(&self, _: &str, _: &[&str], _: Duration) -> Result<usize, CacheError> { Err(down()) }
        async fn set_at(&self, _: &str, _: i64, _: &str) -> Result<(), CacheError> { Err(down()) }
        async fn remove_n(&self, _: &str, _: i64, _: &str) -> Result<usize, CacheError> { Err(down()) }
    }

    #[tokio::test]
    async fn test_valid_token_authenticates() {
        let (sessions, auth) = setup(Arc::new(InMemoryCacheStore::new()));
        let pair = sessions.issue("1001", Some("1,2")).await.unwrap();

        let principal = auth.verify(&pair.access_token).await.unwrap();
        assert_eq!(principal.user_id, "1001");
        assert_eq!(principal.role_ids, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(principal.create_time, pair.create_time);
        assert_eq!(principal.token, pair.access_token);
    }

    #[tokio::test]
    async fn test_refresh_token_is_not_an_access_token() {
        let (sessions, auth) = setup(Arc::new(InMemoryCacheStore::new()));
        let pair = sessions.issue("1001", None).await.unwrap();

        assert_eq!(
            auth.verify(&pair.refresh_token).await,
            Err(AuthError::SignatureInvalid)
        );
    }

    #[tokio::test]
    async fn test_blank_user_id_fails_before_cache() {
        // A down store would turn any lookup into CacheUnavailable
        let (_, auth) = setup(Arc::new(DownStore));
        let keys = TokenKeys::from_settings(&test_config()).unwrap();
        let claims = Claims::new(" ", None, now_millis());
        let token = jwt::encode(&claims, keys.secret(TokenKind::Access), Duration::from_secs(60)).unwrap();

        assert_eq!(auth.verify(&token).await, Err(AuthError::UserIdMissing));
        assert_eq!(auth.verify("not-a-token").await, Err(AuthError::MalformedToken));
    }

    #[tokio::test]
    async fn test_expired_access_token() {
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let mut config = test_config();
        config.access_token_expiry = 0;
        let sessions = SessionManager::new(store.clone(), &config).unwrap();
        let auth = Authenticator::new(store, &config).unwrap();

        let pair = sessions.issue("1001", None).await.unwrap();
        assert_eq!(auth.verify(&pair.access_token).await, Err(AuthError::Expired));
    }

    #[tokio::test]
    async fn test_relogin_invalidates_previous_token() {
        let (sessions, auth) = setup(Arc::new(InMemoryCacheStore::new()));
        let first = sessions.issue("1001", None).await.unwrap();
        let second = sessions.issue("1001", None).await.unwrap();

        assert_eq!(
            auth.verify(&first.access_token).await,
            Err(AuthError::RefreshMismatch)
        );
        assert!(auth.verify(&second.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_revoke_invalidates_token() {
        let (sessions, auth) = setup(Arc::new(InMemoryCacheStore::new()));
        let pair = sessions.issue("1001", None).await.unwrap();
        assert!(auth.verify(&pair.access_token).await.is_ok());

        sessions.revoke("1001").await.unwrap();
        assert_eq!(
            auth.verify(&pair.access_token).await,
            Err(AuthError::RefreshTokenMissing)
        );
    }

    #[tokio::test]
    async fn test_unpersisted_session_is_missing() {
        let store = Arc::new(InMemoryCacheStore::new());
        let (_, auth) = setup(store);
        let keys = TokenKeys::from_settings(&test_config()).unwrap();
        let claims = Claims::new("1001", None, now_millis());
        let token = jwt::encode(&claims, keys.secret(TokenKind::Access), Duration::from_secs(60)).unwrap();

        assert_eq!(auth.verify(&token).await, Err(AuthError::RefreshTokenMissing));
    }

    #[tokio::test]
    async fn test_unreadable_session_record_is_mismatch() {
        let store = Arc::new(InMemoryCacheStore::new());
        let (sessions, auth) = setup(store.clone());
        let pair = sessions.issue("1001", None).await.unwrap();

        store
            .set("session:refresh:1001", "garbage", crate::cache::NO_EXPIRY)
            .await
            .unwrap();
        assert_eq!(
            auth.verify(&pair.access_token).await,
            Err(AuthError::RefreshMismatch)
        );
    }

    #[tokio::test]
    async fn test_store_outage_fails_closed() {
        let keys = TokenKeys::from_settings(&test_config()).unwrap();
        let (_, auth) = setup(Arc::new(DownStore));
        let claims = Claims::new("1001", None, now_millis());
        let token = jwt::encode(&claims, keys.secret(TokenKind::Access), Duration::from_secs(60)).unwrap();

        assert_eq!(auth.verify(&token).await, Err(AuthError::CacheUnavailable));
    }

    #[tokio::test]
    async fn test_issue_reports_store_outage() {
        let (sessions, _) = setup(Arc::new(DownStore));
        match sessions.issue("1001", None).await {
            Err(AppError::Cache(CacheError::Unavailable(_))) => (),
            other => panic!("Expected Unavailable, got {:?}", other.map(|p| p.create_time)),
        }
    }
}
