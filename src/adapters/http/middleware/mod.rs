//! HTTP middleware: authentication and per-IP rate limiting, composed at
//! router construction.

mod auth;
mod rate_limit;

pub use auth::{auth_middleware, AuthRejection, AuthState, RequirePrincipal};
pub use rate_limit::{rate_limit_middleware, IpRateLimitState};
