//! Debug artifact sink: timestamped frame dumps with bounded retention.
//!
//! Simulation mode and debug capture both persist processed frames here so
//! refresh behavior can be inspected without panel hardware. Every save
//! also refreshes a stable `latest.png` alias.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use image::GrayImage;

/// Number of timestamped frames kept on disk.
pub const DEFAULT_RETENTION: usize = 10;

/// Writes frames into a directory, pruning all but the newest few.
#[derive(Debug, Clone)]
pub struct ArtifactSink {
    dir: PathBuf,
    retain: usize,
}

impl ArtifactSink {
    /// Create a sink rooted at `dir` with the default retention.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            retain: DEFAULT_RETENTION,
        }
    }

    /// Override how many timestamped frames are kept.
    #[must_use]
    pub fn with_retention(mut self, retain: usize) -> Self {
        self.retain = retain;
        self
    }

    /// The sink's directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a frame as `frame_<millis>_<label>.png`, refresh the
    /// `latest.png` alias and prune old frames.
    pub fn save(&self, image: &GrayImage, label: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let timestamp = chrono::Utc::now().timestamp_millis();
        let path = self.dir.join(format!("frame_{timestamp}_{label}.png"));
        image
            .save(&path)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        fs::copy(&path, self.dir.join("latest.png"))?;
        self.prune()?;

        tracing::debug!(path = %path.display(), "saved frame artifact");
        Ok(path)
    }

    /// Delete the oldest frames beyond the retention count. The millisecond
    /// timestamp in the name gives lexicographic order == age order.
    fn prune(&self) -> io::Result<()> {
        let mut frames: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("frame_") && n.ends_with(".png"))
            })
            .collect();

        if frames.len() <= self.retain {
            return Ok(());
        }

        frames.sort();
        let excess = frames.len() - self.retain;
        for stale in &frames[..excess] {
            if let Err(e) = fs::remove_file(stale) {
                tracing::warn!(path = %stale.display(), error = %e, "failed to prune artifact");
            }
        }
        Ok(())
    }
}
