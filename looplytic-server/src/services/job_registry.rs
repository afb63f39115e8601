//! In-flight job tracking for health reporting

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Summary of a running job
#[derive(Debug, Clone, Serialize)]
pub struct ActiveJob {
    pub session_id: Uuid,
    pub original_file: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<Uuid, ActiveJob>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a job until the returned guard is dropped
    pub fn register(&self, job: ActiveJob) -> ActiveJobGuard {
        let session_id = job.session_id;
        self.jobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(session_id, job);
        ActiveJobGuard {
            registry: self.clone(),
            session_id,
        }
    }

    /// Running jobs, oldest first
    pub fn snapshot(&self) -> Vec<ActiveJob> {
        let mut jobs: Vec<ActiveJob> = self
            .jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.started_at);
        jobs
    }

    fn remove(&self, session_id: &Uuid) {
        self.jobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(session_id);
    }
}

/// Deregisters its job on drop
#[derive(Debug)]
pub struct ActiveJobGuard {
    registry: JobRegistry,
    session_id: Uuid,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> ActiveJob {
        ActiveJob {
            session_id: Uuid::new_v4(),
            original_file: "song.mp3".to_string(),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_guard_deregisters() {
        let registry = JobRegistry::new();
        let first = job();
        let a = registry.register(first.clone());
        let b = registry.register(job());
        assert_eq!(registry.snapshot().len(), 2);

        drop(b);
        let remaining = registry.snapshot();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].session_id, first.session_id);
        drop(a);
        assert!(registry.snapshot().is_empty());
    }
}
