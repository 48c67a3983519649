//! Resilient gateway to the Skatteverket VAT declaration API.

pub mod admin;
pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod transport;
pub mod upstream;

pub use config::schema::GatewayConfig;
pub use error::{GatewayError, Result};
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
