//! Typed message channel between a parent and its re-executed workers.
//!
//! # Architecture
//!
//! - **codec**: length-prefixed JSON framing
//! - **channel**: blocking channel over one socket-pair endpoint
//! - **async_channel**: the same endpoint driven by tokio

pub mod async_channel;
pub mod channel;
pub mod codec;
