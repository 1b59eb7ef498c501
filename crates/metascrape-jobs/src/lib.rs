//! # metascrape-jobs
//!
//! Scraping pipeline for metascrape.
//!
//! This crate provides:
//! - An HTTP metadata extractor (title, description, keywords)
//! - A pool of concurrent workers draining the job queue
//! - Event notifications via broadcast channels
//! - Optional visibility-timeout redelivery of stalled items
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use metascrape_db::InMemoryStore;
//! use metascrape_jobs::{WorkerBuilder, WorkerConfig};
//!
//! let store = Arc::new(InMemoryStore::new());
//! let worker = WorkerBuilder::from_store(store.clone())
//!     .with_config(WorkerConfig::default().with_worker_count(8))
//!     .build()?;
//!
//! let handle = worker.start();
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! handle.shutdown().await?;
//! ```

pub mod extractor;
pub mod worker;

// Re-export core types
pub use metascrape_core::*;

pub use extractor::{parse_metadata, ExtractorConfig, HttpExtractor};
pub use worker::{
    JobWorker, Pipeline, Recorded, RedeliveryPolicy, ReportRetry, WorkerBuilder, WorkerConfig,
    WorkerEvent, WorkerHandle,
};
