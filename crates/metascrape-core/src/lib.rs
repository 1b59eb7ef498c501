//! # metascrape-core
//!
//! Core types, traits, and abstractions for metascrape.
//!
//! This crate provides the data model shared by the queue, the worker pool
//! and the HTTP API, plus the repository traits that concrete storage
//! backends implement.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
