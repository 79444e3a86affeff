//! Lease lock
//!
//! This module provides:
//! - Lock options, requests, grants and outcomes
//! - The `LeaseLock` service running the acquisition and release protocol

mod model;
mod service;

pub use model::*;
pub use service::*;
