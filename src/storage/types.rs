//! Storage types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content type used for chunk parts
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Metadata about a storage object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}
