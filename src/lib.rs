pub mod config;
pub mod error;
pub mod exchange;
pub mod store;
pub mod web;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use exchange::{SecretExchange, SecretRecord};
