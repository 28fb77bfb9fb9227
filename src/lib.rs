pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

pub use config::Config;
pub use errors::GatewayError;
pub use models::{AppState, Claims, PublicUser, RateLimit, Role, User};
pub use routes::routes;
