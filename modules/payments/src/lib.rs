pub mod canonical;
pub mod clock;
pub mod config;
pub mod cursor;
pub mod db;
pub mod error;
pub mod events;
pub mod idempotency;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod rate_limit;
pub mod repos;
pub mod risk;
pub mod routes;
pub mod services;
pub mod state;
pub mod validation;
pub mod webhooks;

pub use routes::build_router;
pub use state::AppState;
