//! # Vespa Common Library
//!
//! Shared code for the vespa variable-star services including:
//! - Common error and result types
//! - Configuration loading and root folder resolution
//! - Catalogue-ID coordinate parsing

pub mod config;
pub mod coords;
pub mod error;

pub use config::Config;
pub use error::{Error, Result};
