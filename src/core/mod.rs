//! Core utilities: configuration, errors, logging, system metrics.

pub mod config;
pub mod error;
pub mod logging;
pub mod system_metrics;
pub mod utils;

pub use error::{AppError, AppResult};
