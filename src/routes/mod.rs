mod health_check;
mod session;

pub use health_check::health_check;
pub use session::{current_user, logout, refresh, AuthResponse, RefreshRequest, UserResponse};
