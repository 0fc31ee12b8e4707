//! # TierNotify Core
//!
//! Shared domain model for the lifecycle notification scheduler: tenants,
//! package enrollments, trial windows, notification bookkeeping, the error
//! type, TOML configuration, and the capability traits implemented by the
//! record store and delivery channels.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::TierNotifyConfig;
pub use error::{Result, TierNotifyError};
