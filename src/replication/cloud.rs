//! Cloud storage collaborator
//!
//! Concrete backends (S3, filesystem, mocks) live outside this crate.

use bytes::Bytes;

use crate::error::Result;

/// Object storage shared by all replicas
///
/// Paths are full object keys, e.g. `optout/partition/partition-000_...dat`.
/// Failures surface as `OptOutError::Storage`.
pub trait CloudStorage: Send + Sync {
    /// Every key starting with `prefix`
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Full contents of one object
    fn download(&self, path: &str) -> Result<Bytes>;

    /// Create or replace one object
    fn upload(&self, data: Bytes, path: &str) -> Result<()>;

    /// Remove objects; missing keys are not an error
    fn delete(&self, paths: &[String]) -> Result<()>;
}
