//! Object storage for raw uploads and conversion results.
//!
//! Objects are written once under unique keys and never modified in place.
//! Keys are date-partitioned:
//!
//! - raw uploads: `raw/YYYY/MM/DD/<file_id>.<ext>`
//! - results: `processed/YYYY/MM/DD/<file_id>/<task_id>.webm`

mod error;
mod local;

pub use error::StorageError;
pub use local::LocalObjectStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Extension of conversion results.
pub const RESULT_EXTENSION: &str = "webm";

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub key: String,
    pub size_bytes: u64,
    /// SHA-256 of the contents, lowercase hex.
    pub checksum: String,
    pub url: String,
}

/// A blob store addressed by string keys.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns the name of this store implementation.
    fn name(&self) -> &str;

    /// Stores the file at `source` under `key`, verifying its checksum.
    async fn put(&self, key: &str, source: &Path) -> Result<StoredObject, StorageError>;

    /// Copies the object to `dest`. Returns the byte count.
    async fn get(&self, key: &str, dest: &Path) -> Result<u64, StorageError>;

    /// Reads the whole object into memory.
    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Deletes the object. Returns `false` if it did not exist.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Public URL of an object.
    fn url(&self, key: &str) -> String;
}

fn date_prefix(at: DateTime<Utc>) -> String {
    at.format("%Y/%m/%d").to_string()
}

/// Key of a raw upload.
pub fn raw_key(file_id: &str, extension: &str, at: DateTime<Utc>) -> String {
    format!("raw/{}/{}.{}", date_prefix(at), file_id, extension)
}

/// Key of a conversion result. One object per task, so converting a file
/// again never replaces an earlier result.
pub fn processed_key(file_id: &str, task_id: &str, at: DateTime<Utc>) -> String {
    format!(
        "processed/{}/{}/{}.{}",
        date_prefix(at),
        file_id,
        task_id,
        RESULT_EXTENSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_keys_are_date_partitioned() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 23, 59, 0).unwrap();
        assert_eq!(raw_key("abc", "mp4", at), "raw/2024/03/07/abc.mp4");
        assert_eq!(
            processed_key("abc", "t1", at),
            "processed/2024/03/07/abc/t1.webm"
        );
        assert_ne!(processed_key("abc", "t1", at), processed_key("abc", "t2", at));
    }
}
