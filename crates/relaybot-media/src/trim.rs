//! Seam for the external trimming collaborator (§4.4 "ask an external
//! trimmer for duration"). Grounded on `media_processor.py`'s
//! `check_ffmpeg()`/temp-dir idiom, but the actual ffmpeg invocation is an
//! out-of-process collaborator this crate only defines the interface for —
//! no trimmer is wired in by default, matching `trim_over_limit`'s
//! "no trimmer available" branch.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait Trimmer: Send + Sync {
    /// Probe media duration in seconds; `None` if it can't be determined.
    async fn duration_seconds(&self, path: &Path) -> Option<u64>;

    /// Trim `path` down to `max_duration` seconds, returning the trimmed
    /// file's path (a sibling temp file, caller is responsible for cleanup).
    async fn trim(&self, path: &Path, max_duration: u64) -> std::io::Result<PathBuf>;
}
