//! Enumerate and dump container registries that answer the v2 HTTP API
//! without authentication, then sweep the unpacked layers for leaked
//! credentials.

pub mod commands;
pub mod config;
pub mod error;
pub mod layer;
pub mod manifest;
pub mod registry;
pub mod scanner;

pub use error::{RepossessedError, Result};
