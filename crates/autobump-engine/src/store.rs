//! Job persistence — ordinary keyed storage of job records.
//!
//! The dispatcher reads and writes through a `JobStore` every cycle.
//! Two implementations: an in-memory map, and a JSON file store in the
//! same human-readable, git-friendly format the rest of the app state
//! uses. No consistency beyond read-your-writes within one process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use autobump_core::error::{AutobumpError, Result};

use crate::job::Job;

/// Keyed persistence for job records.
pub trait JobStore: Send + Sync {
    fn save(&self, job: &Job) -> Result<()>;
    fn get(&self, id: &str) -> Option<Job>;
    fn all(&self) -> Vec<Job>;
    fn remove(&self, id: &str) -> Result<bool>;
}

/// Map-backed store. Default for tests and single-session runs.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn save(&self, job: &Job) -> Result<()> {
        self.jobs
            .lock()
            .expect("job store lock poisoned")
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Option<Job> {
        self.jobs.lock().expect("job store lock poisoned").get(id).cloned()
    }

    fn all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .expect("job store lock poisoned")
            .values()
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs
    }

    fn remove(&self, id: &str) -> Result<bool> {
        Ok(self
            .jobs
            .lock()
            .expect("job store lock poisoned")
            .remove(id)
            .is_some())
    }
}

/// JSON-file store — jobs.json under the given directory. Writes the
/// whole set on every change; job counts are small enough that this
/// beats carrying a database.
pub struct JsonJobStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, Job>>,
}

impl JsonJobStore {
    /// Open (or create) the store at the given directory.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("jobs.json");
        let cache = if path.exists() {
            let json = std::fs::read_to_string(&path)?;
            let jobs: Vec<Job> = serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("⚠️ Failed to parse jobs.json, starting empty: {e}");
                Vec::new()
            });
            jobs.into_iter().map(|j| (j.id.clone(), j)).collect()
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    /// Default store directory (~/.autobump/jobs).
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".autobump")
            .join("jobs")
    }

    fn flush(&self, cache: &HashMap<String, Job>) -> Result<()> {
        let mut jobs: Vec<&Job> = cache.values().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let json = serde_json::to_string_pretty(&jobs)?;
        std::fs::write(&self.path, json)
            .map_err(|e| AutobumpError::Store(format!("write {}: {e}", self.path.display())))?;
        tracing::debug!("💾 Saved {} jobs to {}", jobs.len(), self.path.display());
        Ok(())
    }
}

impl JobStore for JsonJobStore {
    fn save(&self, job: &Job) -> Result<()> {
        let mut cache = self.cache.lock().expect("job store lock poisoned");
        cache.insert(job.id.clone(), job.clone());
        self.flush(&cache)
    }

    fn get(&self, id: &str) -> Option<Job> {
        self.cache.lock().expect("job store lock poisoned").get(id).cloned()
    }

    fn all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .cache
            .lock()
            .expect("job store lock poisoned")
            .values()
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let mut cache = self.cache.lock().expect("job store lock poisoned");
        let removed = cache.remove(id).is_some();
        if removed {
            self.flush(&cache)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autobump_core::types::{ActionType, Strategy};
    use chrono::Utc;

    fn job(target: &str) -> Job {
        Job::new(ActionType::Bump, target, Strategy::Continuous, 5, Utc::now())
    }

    #[test]
    fn test_in_memory_roundtrip() {
        let store = InMemoryJobStore::new();
        let j = job("l-1");
        store.save(&j).unwrap();
        assert_eq!(store.get(&j.id).unwrap().target_id, "l-1");
        assert_eq!(store.all().len(), 1);
        assert!(store.remove(&j.id).unwrap());
        assert!(store.get(&j.id).is_none());
    }

    #[test]
    fn test_json_store_survives_reopen() {
        let dir = std::env::temp_dir().join("autobump-test-store");
        std::fs::remove_dir_all(&dir).ok();

        let j = job("l-2");
        {
            let store = JsonJobStore::open(&dir).unwrap();
            store.save(&j).unwrap();
        }
        let reopened = JsonJobStore::open(&dir).unwrap();
        assert_eq!(reopened.get(&j.id).unwrap().target_id, "l-2");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_json_store_tolerates_garbage_file() {
        let dir = std::env::temp_dir().join("autobump-test-garbage");
        std::fs::create_dir_all(&dir).ok();
        std::fs::write(dir.join("jobs.json"), "not json").unwrap();

        let store = JsonJobStore::open(&dir).unwrap();
        assert!(store.all().is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }
}
