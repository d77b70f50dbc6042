/// Session Routes
///
/// Token refresh, current principal lookup and logout. Protected handlers
/// read the `Principal` injected by the bearer middleware.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::{Principal, SessionManager, TokenPair};
use crate::error::{AppError, ErrorContext};

/// Token refresh request
#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Token pair handed back to the client
#[derive(Serialize, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

impl AuthResponse {
    fn new(pair: TokenPair, sessions: &SessionManager) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: sessions.access_ttl().as_secs(),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct UserResponse {
    pub user_id: String,
    pub role_ids: Vec<String>,
    pub create_time: i64,
}

/// POST /auth/refresh
///
/// Exchange the refresh token of the active session for a new pair. The
/// presented pair is superseded and stops verifying.
///
/// # Errors
/// - 401: malformed, expired, revoked or superseded refresh token
/// - 503: session store unreachable while writing the new session
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_refresh");

    let pair = sessions.refresh(&form.refresh_token).await?;

    tracing::info!(
        request_id = %context.request_id,
        create_time = pair.create_time,
        "Token refreshed successfully"
    );

    Ok(HttpResponse::Ok().json(AuthResponse::new(pair, sessions.get_ref())))
}

/// GET /api/me
pub async fn current_user(principal: web::ReqData<Principal>) -> HttpResponse {
    let principal = principal.into_inner();
    HttpResponse::Ok().json(UserResponse {
        user_id: principal.user_id,
        role_ids: principal.role_ids,
        create_time: principal.create_time,
    })
}

/// POST /api/logout
///
/// Deletes the caller's session record; both tokens of the pair are rejected
/// from then on.
pub async fn logout(
    principal: web::ReqData<Principal>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("logout").with_user_id(principal.user_id.clone());

    if let Err(e) = sessions.revoke(&principal.user_id).await {
        context.log_error(&e);
        return Err(e);
    }

    Ok(HttpResponse::NoContent().finish())
}
