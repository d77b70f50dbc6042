/// Middleware module
///
/// Request authentication for protected scopes.

mod bearer_auth;

pub use bearer_auth::BearerAuth;
