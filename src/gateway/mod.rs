//! HTTP gateway

mod router;
mod server;

pub use self::router::{AppState, create_router};
pub use self::server::Gateway;
