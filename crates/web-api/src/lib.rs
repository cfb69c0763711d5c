//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP / WebSocket 请求委托给投递流水线和 Hub。

mod auth;
mod error;
mod rate_limit;
mod routes;
mod state;
mod ws_connection;

pub use auth::{Claims, CurrentUser, JwtService};
pub use config::JwtConfig;
pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
