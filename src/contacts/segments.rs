//! Segment tags persisted as a flat JSON object (`{"<id or number>": "<tag>"}`).

use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

use crate::error::Result;

/// File-backed map from contact id or normalized number to a segment tag.
pub struct SegmentStore {
    path: PathBuf,
    segments: RwLock<HashMap<String, String>>,
}

impl SegmentStore {
    /// Load the store from `path`. A missing or unreadable file starts empty.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let segments = match tokio::fs::read_to_string(&path).await {
            Ok(data) => match serde_json::from_str::<HashMap<String, String>>(&data) {
                Ok(map) => {
                    tracing::info!("Loaded {} contact segment(s) from {}", map.len(), path.display());
                    map
                }
                Err(e) => {
                    tracing::error!("Failed to parse contact segments {}: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::error!("Failed to read contact segments {}: {}", path.display(), e);
                HashMap::new()
            }
        };

        Self {
            path,
            segments: RwLock::new(segments),
        }
    }

    /// Snapshot of all tags.
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.segments.read().await.clone()
    }

    /// Merge `updates` into the store and persist the result.
    ///
    /// An empty tag removes the key. When the file cannot be written the
    /// in-memory tags stay as they were.
    pub async fn update(&self, updates: HashMap<String, String>) -> Result<usize> {
        let mut segments = self.segments.write().await;
        let mut merged = segments.clone();
        for (key, tag) in updates {
            if tag.trim().is_empty() {
                merged.remove(&key);
            } else {
                merged.insert(key, tag);
            }
        }

        let json = serde_json::to_string_pretty(&merged)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await?;

        let total = merged.len();
        *segments = merged;
        Ok(total)
    }
}
