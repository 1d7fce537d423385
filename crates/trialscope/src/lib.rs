#![doc = include_str!("../../../README.md")]
//!

//! This crate bundles the aggregation core and the REST/SSE server.

pub use trialscope_core::*;
pub use trialscope_server as server;
