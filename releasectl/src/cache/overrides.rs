//! Content-addressed value-override files
//!
//! Override content is written once to `<dir>/<sha256>.yaml` and reused by every
//! execution that supplies the same content. Writers for one hash serialize on
//! a per-hash lock. Entries idle longer than the TTL are evicted together with
//! their file; a later request simply writes the file again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::errors::DeployError;
use crate::filesys::{Dir, File};
use crate::utils::sha256_hash;

struct CacheEntry {
    lock: Arc<tokio::sync::Mutex<()>>,
    last_used: Instant,
}

pub struct OverrideFileCache {
    dir: Dir,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl OverrideFileCache {
    pub fn new(dir: Dir, ttl: Duration) -> Self {
        Self {
            dir,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Dir {
        &self.dir
    }

    /// Path for `content`, whether or not it has been written yet
    pub fn path_for(&self, content: &str) -> File {
        self.dir
            .file(&format!("{}.yaml", sha256_hash(content.as_bytes())))
    }

    /// Write `content` unless an identical file already exists, and return it
    pub async fn materialize(&self, content: &str) -> Result<File, DeployError> {
        let digest = sha256_hash(content.as_bytes());
        let lock = self.checkout(&digest, Instant::now());
        let _guard = lock.lock().await;

        let file = self.dir.file(&format!("{}.yaml", digest));
        if file.exists().await {
            debug!("Reusing override file {}", file.path().display());
        } else {
            file.write_atomic(content.as_bytes()).await?;
            debug!("Wrote override file {}", file.path().display());
        }
        Ok(file)
    }

    /// Write every non-blank entry of `contents`, preserving order
    pub async fn materialize_all(&self, contents: &[String]) -> Result<Vec<File>, DeployError> {
        let mut files = Vec::new();
        for content in contents.iter().filter(|c| !c.trim().is_empty()) {
            files.push(self.materialize(content).await?);
        }
        Ok(files)
    }

    /// Drop entries idle since before `now - ttl` that nobody holds.
    /// Returns the number evicted.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.evict_locked(&mut entries, now)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn checkout(&self, digest: &str, now: Instant) -> Arc<tokio::sync::Mutex<()>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.evict_locked(&mut entries, now);

        let entry = entries
            .entry(digest.to_string())
            .or_insert_with(|| CacheEntry {
                lock: Arc::new(tokio::sync::Mutex::new(())),
                last_used: now,
            });
        entry.last_used = now;
        entry.lock.clone()
    }

    // File removal happens under the map lock so a concurrent checkout of the
    // same hash cannot observe a file that is about to disappear.
    fn evict_locked(&self, entries: &mut HashMap<String, CacheEntry>, now: Instant) -> usize {
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| {
                now.saturating_duration_since(e.last_used) > self.ttl
                    && Arc::strong_count(&e.lock) == 1
            })
            .map(|(digest, _)| digest.clone())
            .collect();

        for digest in &expired {
            entries.remove(digest);
            let path = self.dir.path().join(format!("{}.yaml", digest));
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Evicted override file {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove override file {}: {}", path.display(), e),
            }
        }
        expired.len()
    }
}

impl std::fmt::Debug for OverrideFileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverrideFileCache")
            .field("dir", &self.dir)
            .field("ttl", &self.ttl)
            .field("entries", &self.len())
            .finish()
    }
}
