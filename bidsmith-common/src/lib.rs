//! # bidsmith Common Library
//!
//! Shared code for the bidsmith workspace:
//! - Error type and result alias
//! - TOML bootstrap configuration and config-file resolution
//! - Atomic JSON/TOML file output
//! - Logging initialization

pub mod config;
pub mod error;
pub mod files;
pub mod logging;

pub use error::{Error, Result};
