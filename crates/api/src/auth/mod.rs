//! Authentication for the meal plan API
//!
//! Identity comes from an external auth provider; this crate only verifies
//! the HS256 token it issues.

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtError, JwtManager};
pub use middleware::{require_auth, AuthError, AuthState, AuthUser, SESSION_COOKIE};
