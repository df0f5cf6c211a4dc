//! Opt-out file names
//!
//! Parses and generates `{delta|partition}-{replica:03}_{ts}_{rand}.dat`.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{OptOutError, Result};

/// Replica id reserved for synthetic (test traffic) files
pub const SYNTHETIC_REPLICA_ID: u32 = 999;

const DELTA_PREFIX: &str = "delta";
const PARTITION_PREFIX: &str = "partition";
const EXTENSION: &str = ".dat";

/// Kind of opt-out file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Append-only log for one replica and rotation window
    Delta,
    /// Sorted, deduplicated snapshot (also used for synthetic files)
    Partition,
}

impl FileKind {
    fn prefix(self) -> &'static str {
        match self {
            FileKind::Delta => DELTA_PREFIX,
            FileKind::Partition => PARTITION_PREFIX,
        }
    }
}

/// A parsed opt-out file name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OptOutFile {
    pub kind: FileKind,
    pub replica_id: u32,
    pub timestamp: DateTime<Utc>,
    /// 8 lowercase hex digits
    pub suffix: String,
}

impl OptOutFile {
    /// New file name with a random suffix
    pub fn new(kind: FileKind, replica_id: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            replica_id,
            timestamp,
            suffix: format!("{:08x}", rand::random::<u32>()),
        }
    }

    /// Parse the file name component of a local path
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| OptOutError::InvalidFileName(path.display().to_string()))?;
        name.parse()
    }

    /// Parse the last segment of a cloud key
    pub fn from_cloud_path(path: &str) -> Result<Self> {
        path.rsplit('/').next().unwrap_or(path).parse()
    }

    /// Files written by the reserved synthetic replica
    pub fn is_synthetic(&self) -> bool {
        self.replica_id == SYNTHETIC_REPLICA_ID
    }

    pub fn is_delta(&self) -> bool {
        self.kind == FileKind::Delta
    }

    pub fn is_partition(&self) -> bool {
        self.kind == FileKind::Partition
    }

    /// `yyyy-MM-dd` of the timestamp, naming the cloud delta folder
    pub fn date_folder(&self) -> String {
        self.timestamp.format("%Y-%m-%d").to_string()
    }

    pub fn file_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for OptOutFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timestamp = self
            .timestamp
            .to_rfc3339_opts(SecondsFormat::AutoSi, true)
            .replace(':', ".");
        write!(
            f,
            "{}-{:03}_{}_{}{}",
            self.kind.prefix(),
            self.replica_id,
            timestamp,
            self.suffix,
            EXTENSION
        )
    }
}

impl FromStr for OptOutFile {
    type Err = OptOutError;

    /// "delta-003_2024-05-01T12.30.00Z_0badf00d.dat"
    fn from_str(name: &str) -> Result<Self> {
        let invalid = || OptOutError::InvalidFileName(name.to_string());

        let stem = name.strip_suffix(EXTENSION).ok_or_else(invalid)?;
        let (prefix, rest) = stem.split_once('-').ok_or_else(invalid)?;
        let kind = match prefix {
            DELTA_PREFIX => FileKind::Delta,
            PARTITION_PREFIX => FileKind::Partition,
            _ => return Err(invalid()),
        };

        let (replica, rest) = rest.split_once('_').ok_or_else(invalid)?;
        let (timestamp, suffix) = rest.rsplit_once('_').ok_or_else(invalid)?;

        let replica_id = replica.parse::<u32>().map_err(|_| invalid())?;
        if suffix.len() != 8 || !suffix.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        // Only the two time separators were escaped; a third '.' is fractional seconds
        let timestamp = DateTime::parse_from_rfc3339(&timestamp.replacen('.', ":", 2))
            .map_err(|_| invalid())?
            .with_timezone(&Utc);

        Ok(Self {
            kind,
            replica_id,
            timestamp,
            suffix: suffix.to_string(),
        })
    }
}
