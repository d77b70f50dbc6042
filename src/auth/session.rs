/// Session Management
///
/// Issues access/refresh token pairs and owns the write path to the cached
/// session record (`<prefix><userId> -> refresh token`). A newer login
/// overwrites the record, so tokens from the previous pair stop verifying.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::auth::claims::{Claims, CREATE_TIME_CLAIM};
use crate::auth::jwt::{self, now_millis, TokenKeys, TokenKind};
use crate::cache::CacheStore;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, ErrorContext};

/// Cache key of the session record for `user_id`
pub fn session_key(prefix: &str, user_id: &str) -> String {
    format!("{}{}", prefix, user_id)
}

/// `createTime` of a cached refresh token, if it can be read
pub(crate) fn cached_create_time(refresh_token: &str) -> Option<i64> {
    jwt::get_claim(refresh_token, CREATE_TIME_CLAIM).and_then(|raw| raw.parse().ok())
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Shared `createTime` of both tokens
    pub create_time: i64,
}

pub struct SessionManager {
    store: Arc<dyn CacheStore>,
    keys: TokenKeys,
    access_ttl: Duration,
    refresh_ttl: Duration,
    session_ttl: Duration,
    prefix: String,
    last_minted: AtomicI64,
}

impl SessionManager {
    pub fn new(store: Arc<dyn CacheStore>, config: &JwtSettings) -> Result<Self, AppError> {
        Ok(Self {
            store,
            keys: TokenKeys::from_settings(config)?,
            access_ttl: config.access_ttl(),
            refresh_ttl: config.refresh_ttl(),
            session_ttl: config.session_ttl(),
            prefix: config.session_prefix.clone(),
            last_minted: AtomicI64::new(0),
        })
    }

    pub fn session_key(&self, user_id: &str) -> String {
        session_key(&self.prefix, user_id)
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Minting time for a new pair. Strictly increasing within this process,
    /// so two logins in the same millisecond still get distinct sessions.
    fn mint_time(&self) -> i64 {
        let now = now_millis();
        let previous = self
            .last_minted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }

    /// Mint a token pair for `user_id` and record it as the active session.
    ///
    /// # Errors
    /// `AppError::Cache` if the session record could not be written; the
    /// tokens are discarded and the caller decides whether to retry.
    pub async fn issue(&self, user_id: &str, role_ids: Option<&str>) -> Result<TokenPair, AppError> {
        if user_id.trim().is_empty() {
            return Err(AuthError::UserIdMissing.into());
        }

        let claims = Claims::new(user_id, role_ids.map(str::to_string), self.mint_time());
        let access_token = jwt::encode(&claims, self.keys.secret(TokenKind::Access), self.access_ttl)?;
        let refresh_token =
            jwt::encode(&claims, self.keys.secret(TokenKind::Refresh), self.refresh_ttl)?;

        if let Err(e) = self
            .store
            .set(&self.session_key(user_id), &refresh_token, self.session_ttl)
            .await
        {
            let error = AppError::Cache(e);
            ErrorContext::new("issue_session")
                .with_user_id(user_id)
                .log_error(&error);
            return Err(error);
        }

        tracing::info!(
            user_id = %user_id,
            create_time = claims.create_time,
            "Session issued"
        );

        Ok(TokenPair {
            access_token,
            refresh_token,
            create_time: claims.create_time,
        })
    }

    /// Exchange a refresh token for a new pair. The presented token must
    /// belong to the currently cached session; the old pair stops working.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        let claims = jwt::decode(refresh_token, self.keys.secret(TokenKind::Refresh))?;

        let cached = self
            .store
            .get(&self.session_key(&claims.user_id))
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Session lookup failed during refresh");
                AuthError::CacheUnavailable
            })?
            .ok_or(AuthError::RefreshTokenMissing)?;

        if cached_create_time(&cached) != Some(claims.create_time) {
            tracing::warn!(user_id = %claims.user_id, "Refresh token from a superseded session");
            return Err(AuthError::RefreshMismatch.into());
        }

        self.issue(&claims.user_id, claims.role_ids.as_deref()).await
    }

    /// Delete the session record. Returns whether one existed.
    pub async fn revoke(&self, user_id: &str) -> Result<bool, AppError> {
        let removed = self.store.delete(&[self.session_key(user_id).as_str()]).await?;
        tracing::info!(user_id = %user_id, existed = removed > 0, "Session revoked");
        Ok(removed > 0)
    }

    /// The refresh token currently cached for `user_id`
    pub async fn session(&self, user_id: &str) -> Result<Option<String>, AppError> {
        Ok(self.store.get(&self.session_key(user_id)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Expiry, InMemoryCacheStore};
    use crate::configuration::SessionTtlPolicy;

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

    fn manager(config: &JwtSettings) -> (Arc<InMemoryCacheStore>, SessionManager) {
        let store = Arc::new(InMemoryCacheStore::new());
        let manager = SessionManager::new(store.clone(), config).unwrap();
        (store, manager)
    }

    #[tokio::test]
    async fn test_issue_stores_refresh_token() {
        let (store, manager) = manager(&test_config());
        let pair = manager.issue("1001", Some("1,2")).await.unwrap();

        let cached = store.get("session:refresh:1001").await.unwrap();
        assert_eq!(cached, Some(pair.refresh_token.clone()));
        assert_eq!(cached_create_time(&pair.refresh_token), Some(pair.create_time));
        assert_eq!(cached_create_time(&pair.access_token), Some(pair.create_time));
    }

    #[tokio::test]
    async fn test_session_ttl_follows_policy() {
        let mut config = test_config();
        config.session_ttl_policy = SessionTtlPolicy::Access;
        let (store, manager) = manager(&config);
        manager.issue("1001", None).await.unwrap();

        match store.expiry("session:refresh:1001").await.unwrap() {
            Expiry::Remaining(ttl) => {
                assert!(ttl <= Duration::from_secs(3000));
                assert!(ttl > Duration::from_secs(2990));
            }
            other => panic!("Expected a TTL, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_blank_user_id_rejected() {
        let (_, manager) = manager(&test_config());
        match manager.issue("  ", None).await {
            Err(AppError::Auth(AuthError::UserIdMissing)) => (),
            other => panic!("Expected UserIdMissing, got {:?}", other.map(|p| p.create_time)),
        }
    }

    #[tokio::test]
    async fn test_consecutive_issues_get_distinct_times() {
        let (_, manager) = manager(&test_config());
        let first = manager.issue("1001", None).await.unwrap();
        let second = manager.issue("1001", None).await.unwrap();

        assert!(second.create_time > first.create_time);
    }

    #[tokio::test]
    async fn test_refresh_rotates_session() {
        let (_, manager) = manager(&test_config());
        let first = manager.issue("1001", Some("2")).await.unwrap();

        let second = manager.refresh(&first.refresh_token).await.unwrap();
        assert!(second.create_time > first.create_time);
        assert_eq!(
            manager.session("1001").await.unwrap(),
            Some(second.refresh_token.clone())
        );

        // The rotated-out refresh token cannot be replayed
        match manager.refresh(&first.refresh_token).await {
            Err(AppError::Auth(AuthError::RefreshMismatch)) => (),
            other => panic!("Expected RefreshMismatch, got {:?}", other.map(|p| p.create_time)),
        }
    }

    #[tokio::test]
    async fn test_refresh_rejects_access_token() {
        let (_, manager) = manager(&test_config());
        let pair = manager.issue("1001", None).await.unwrap();

        match manager.refresh(&pair.access_token).await {
            Err(AppError::Auth(AuthError::SignatureInvalid)) => (),
            other => panic!("Expected SignatureInvalid, got {:?}", other.map(|p| p.create_time)),
        }
    }

    #[tokio::test]
    async fn test_revoke() {
        let (_, manager) = manager(&test_config());
        let pair = manager.issue("1001", None).await.unwrap();

        assert!(manager.revoke("1001").await.unwrap());
        assert!(!manager.revoke("1001").await.unwrap());
        assert_eq!(manager.session("1001").await.unwrap(), None);

        match manager.refresh(&pair.refresh_token).await {
            Err(AppError::Auth(AuthError::RefreshTokenMissing)) => (),
            other => panic!("Expected RefreshTokenMissing, got {:?}", other.map(|p| p.create_time)),
        }
    }
}
