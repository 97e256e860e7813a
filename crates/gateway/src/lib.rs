pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod state;

pub use config::GatewayConfig;
pub use state::AppState;
