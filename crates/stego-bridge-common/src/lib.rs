//! Common types, errors, and configuration for stego-bridge.
//!
//! This crate provides shared functionality used across the stego-bridge
//! workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for the guest module path and logging

pub mod config;
pub mod error;

pub use config::{ConfigError, ConfigFile, LoggingConfig, ModuleConfig};
pub use error::{InvocationError, StartupError};
