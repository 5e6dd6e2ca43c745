pub mod auth;
pub mod error;
pub mod protocol;
pub mod routes;
pub mod state;
pub mod websocket;

pub use auth::{Claims, JwtService};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
