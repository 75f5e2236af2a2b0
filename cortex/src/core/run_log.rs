use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::core::error::Result;

pub const DEFAULT_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Skipped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub status: RunStatus,
    pub topic: Option<String>,
    pub seo_score: Option<u8>,
    pub message: String,
    pub post_url: Option<String>,
}

impl RunLogEntry {
    pub fn new(status: RunStatus, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            status,
            topic: None,
            seo_score: None,
            message: message.into(),
            post_url: None,
        }
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn seo_score(mut self, score: u8) -> Self {
        self.seo_score = Some(score);
        self
    }

    pub fn post_url(mut self, url: impl Into<String>) -> Self {
        self.post_url = Some(url.into());
        self
    }
}

/// Bounded, append-only cycle log. Oldest entries are evicted first.
pub struct RunLog {
    db: Db,
    tree: Tree,
    capacity: usize,
}

impl RunLog {
    pub fn new(db: &Db, capacity: usize) -> Result<Self> {
        Ok(Self {
            db: db.clone(),
            tree: db.open_tree("run_log")?,
            capacity: capacity.max(1),
        })
    }

    pub fn append(&self, entry: &RunLogEntry) -> Result<()> {
        // monotonic ids keep iteration in insertion order
        let key = self.db.generate_id()?.to_be_bytes();
        self.tree.insert(key, serde_json::to_vec(entry)?)?;
        while self.tree.len() > self.capacity {
            if self.tree.pop_min()?.is_none() {
                break;
            }
        }
        self.tree.flush()?;
        Ok(())
    }

    /// Newest first.
    pub fn recent(&self, n: usize) -> Result<Vec<RunLogEntry>> {
        let mut entries = Vec::with_capacity(n.min(self.capacity));
        for item in self.tree.iter().rev().take(n) {
            let (_, val) = item?;
            entries.push(serde_json::from_slice(&val)?);
        }
        Ok(entries)
    }

    /// Oldest first.
    pub fn all(&self) -> Result<Vec<RunLogEntry>> {
        self.tree
            .iter()
            .map(|item| -> Result<RunLogEntry> {
                let (_, val) = item?;
                Ok(serde_json::from_slice(&val)?)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}
