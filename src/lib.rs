//! Chunked Upload Server Library
//!
//! Resumable chunked uploads into S3-compatible object storage.
//! The server binary is in main.rs.
//!
//! # Modules
//!
//! - `upload`: Session registry, chunk ingestion, merge and cancellation
//! - `storage`: Blob store trait with S3, filesystem and in-memory backends
//! - `routes`: HTTP surface

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;

pub use config::Config;
pub use error::{AppError, Result};
pub use state::AppState;
