/// Authentication module
///
/// Token encoding/verification, session issuance and revocation, and the
/// verifier that cross-checks access tokens against the session store.

mod authenticator;
mod claims;
pub mod jwt;
mod session;

pub use authenticator::{Authenticator, Principal, TokenVerifier};
pub use claims::{Claims, CREATE_TIME_CLAIM, ROLE_IDS_CLAIM, USER_ID_CLAIM};
pub use jwt::{TokenKeys, TokenKind, TokenSecret};
pub use session::{session_key, SessionManager, TokenPair};
