//! # GeoCheck Common Library
//!
//! Shared code for the GeoCheck crates:
//! - Error types
//! - Configuration loading (CLI → ENV → TOML → defaults)
//! - Tracing initialization

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
