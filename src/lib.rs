//! segsync: A library for reconciling email-domain exports into a
//! feature-flag segment rule.
//!
//! This library provides the components of a periodic batch catch-up
//! job: watermark extraction from the remote rule, date-partitioned
//! manifest scanning, gzip CSV domain extraction, and size-bounded
//! patch assembly against the flag service.
//!
//! # Example
//!
//! ```ignore
//! use segsync::{Config, run_reconciliation, error::RunError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), RunError> {
//!     let config = Config::from_file("config.yaml")?;
//!     let stats = run_reconciliation(config).await?;
//!     println!("Added {} new domains", stats.new_domains);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod manifest;
pub mod merge;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod segment;
pub mod storage;
pub mod watermark;

// Re-export main types
pub use config::Config;
pub use pipeline::{Plan, PlanOptions, Reconciler, RunStats, plan_reconciliation, run_reconciliation};
pub use storage::{StorageProvider, StorageProviderRef};
