use std::fs::{self, Metadata};
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, NaiveDate, Utc};
use filetime::FileTime;

use crate::error::{Error, Result};

/// Modification time of an archived file.
///
/// Once a download has been stamped, its mtime equals the creation time of the
/// media it holds, so this is the value the resume window is computed from.
/// All reads and writes of archive mtimes go through this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArchivedAt(DateTime<Utc>);

impl ArchivedAt {
    pub fn new(ts: DateTime<Utc>) -> Self {
        Self(ts)
    }

    pub fn from_metadata(meta: &Metadata) -> std::io::Result<Self> {
        let modified: SystemTime = meta.modified()?;
        Ok(Self(modified.into()))
    }

    /// Set both access and modification time of `path` to this instant.
    pub fn stamp(&self, path: &Path) -> Result<()> {
        let ft = FileTime::from_unix_time(self.0.timestamp(), self.0.timestamp_subsec_nanos());
        filetime::set_file_times(path, ft, ft).map_err(|e| Error::io(path, e))
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn day(&self) -> NaiveDate {
        self.0.date_naive()
    }
}

/// Oldest and newest archived file in one account directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveState {
    pub oldest: Option<ArchivedAt>,
    pub newest: Option<ArchivedAt>,
}

impl ArchiveState {
    fn observe(self, t: ArchivedAt) -> Self {
        Self {
            oldest: Some(self.oldest.map_or(t, |o| o.min(t))),
            newest: Some(self.newest.map_or(t, |n| n.max(t))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.oldest.is_none()
    }
}

impl FromIterator<ArchivedAt> for ArchiveState {
    fn from_iter<I: IntoIterator<Item = ArchivedAt>>(iter: I) -> Self {
        iter.into_iter().fold(Self::default(), Self::observe)
    }
}

/// Scan the plain files directly inside `dir` (not recursive).
pub fn scan(dir: &Path) -> Result<ArchiveState> {
    let unavailable = |source| Error::DirectoryUnavailable {
        path: dir.to_path_buf(),
        source,
    };

    let mut times = Vec::new();
    for entry in fs::read_dir(dir).map_err(unavailable)? {
        let entry = entry.map_err(unavailable)?;
        let file_type = entry.file_type().map_err(unavailable)?;
        if file_type.is_dir() {
            continue;
        }
        let meta = entry.metadata().map_err(unavailable)?;
        times.push(ArchivedAt::from_metadata(&meta).map_err(unavailable)?);
    }

    Ok(times.into_iter().collect())
}
