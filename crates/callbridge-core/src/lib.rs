//! Shared types, configuration, errors, and engine traits for CallBridge.

pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;

pub use error::{BridgeError, Result};
