/// Bearer Authentication Middleware
///
/// Runs the token verifier on the `Authorization: Bearer` header and injects
/// the resulting `Principal` into request extensions. Every rejection gets
/// the same 401 body; the specific reason is only logged.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::error::unauthenticated_response;

fn bearer_token(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

fn unauthenticated() -> Error {
    actix_web::error::InternalError::from_response("Unauthenticated", unauthenticated_response())
        .into()
}

/// Middleware for protecting routes
pub struct BearerAuth {
    verifier: Arc<dyn TokenVerifier>,
}

impl BearerAuth {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { verifier }
    }
}

impl<S, B> Transform<S, ServiceRequest> for BearerAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = BearerAuthService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(BearerAuthService {
            service: Rc::new(service),
            verifier: self.verifier.clone(),
        }))
    }
}

pub struct BearerAuthService<S> {
    service: Rc<S>,
    verifier: Arc<dyn TokenVerifier>,
}

impl<S, B> Service<ServiceRequest> for BearerAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let verifier = self.verifier.clone();

        Box::pin(async move {
            let Some(token) = bearer_token(&req) else {
                tracing::warn!(path = %req.path(), "Missing or invalid Authorization header");
                return Err(unauthenticated());
            };

            match verifier.verify(&token).await {
                Ok(principal) => {
                    tracing::debug!(user_id = %principal.user_id, "Request authenticated");
                    req.extensions_mut().insert(principal);
                    service.call(req).await
                }
                Err(e) => {
                    tracing::warn!(path = %req.path(), kind = e.kind(), "Authentication rejected");
                    Err(unauthenticated())
                }
            }
        })
    }
}
