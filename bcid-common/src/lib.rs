//! # bcid common library
//!
//! Shared code for every identification pipeline stage:
//! - Error taxonomy (`Error`, `RequestError`)
//! - Configuration loading and environment overrides
//! - Tracing subscriber setup
//! - Durable per-query error log
//! - Cross-process request throttle with retry

pub mod config;
pub mod error;
pub mod error_log;
pub mod logging;
pub mod throttle;

pub use config::Config;
pub use error::{Error, RequestError, Result};
pub use error_log::{ErrorLocation, ErrorLog, ErrorRecord};
pub use throttle::{EndpointQuota, Throttle, ThrottleStore};
