//! # TierNotify Channels
//! Delivery channel implementations.

pub mod http;

pub use http::{HttpDeliveryChannel, HttpDeliveryConfig};
