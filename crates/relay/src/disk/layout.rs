use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{UploadConfig, MAX_SUBDIR_NUM};
use crate::protocol::DiskError;

/// Temp files live in `base_dir/<XX>/`, `XX` being one of `shards` two-digit hex names.
#[derive(Debug, Clone)]
pub struct ShardLayout {
    base_dir: PathBuf,
    shards: usize,
}

impl ShardLayout {
    pub fn new(base_dir: impl Into<PathBuf>, shards: usize) -> Self {
        Self { base_dir: base_dir.into(), shards: shards.clamp(1, MAX_SUBDIR_NUM) }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(&config.base_dir, config.subdir_num)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn shards(&self) -> usize {
        self.shards
    }

    pub fn shard_dir(&self, index: usize) -> PathBuf {
        self.base_dir.join(format!("{index:02X}"))
    }

    /// A shard directory chosen uniformly at random.
    pub fn pick(&self) -> PathBuf {
        let index = rand::rng().random_range(0..self.shards);
        self.shard_dir(index)
    }

    /// Creates the base and shard directories and removes files a previous run left behind.
    pub fn bootstrap(&self) -> Result<(), DiskError> {
        let mut builder = DirBuilder::new();
        builder.recursive(true).mode(0o777);

        builder.create(&self.base_dir).map_err(|e| DiskError::bootstrap(&self.base_dir, e))?;

        let mut purged = 0usize;
        for index in 0..self.shards {
            let dir = self.shard_dir(index);
            builder.create(&dir).map_err(|e| DiskError::bootstrap(&dir, e))?;
            purged += purge(&dir).map_err(|e| DiskError::bootstrap(&dir, e))?;
        }

        info!(base_dir = %self.base_dir.display(), shards = self.shards, purged, "buffer directories ready");
        Ok(())
    }
}

fn purge(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(path = %entry.path().display(), "removed stale buffer file");
                removed += 1;
            }
            Err(e) => warn!(path = %entry.path().display(), cause = %e, "can't remove stale buffer file"),
        }
    }
    Ok(removed)
}
