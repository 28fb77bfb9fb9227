pub mod auth;
pub mod proxy;
pub mod rate_limit;

pub use auth::{bearer_token, require_role, AuthService, UserStore};
pub use proxy::{ForwardRequest, Proxy, ProxyRoute};
pub use rate_limit::RateLimiter;
