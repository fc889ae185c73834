//! C7 Quota Gate: per-repository write-rate limiting (spec.md §4.7).
//!
//! A classic token bucket, refilled continuously at `request_quota /
//! time_window_seconds` tokens per second, capacity `request_quota`.
//! When the server has no quota configured (`write_quota_per_repository
//! == None`), every check bypasses accounting entirely — no bucket is
//! ever allocated.

use std::sync::Mutex;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::WriteQuotaConfig;
use crate::errors::{CoreError, CoreResult};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct QuotaGate {
    default_spec: Option<WriteQuotaConfig>,
    /// Per-repository overrides installed by `SetWriteQuota` commands
    /// (spec.md §4.5, §4.7). Absent entries fall back to `default_spec`;
    /// an entry holding `None` means this repository is explicitly
    /// unlimited regardless of the server-wide default.
    overrides: DashMap<(String, String), Option<WriteQuotaConfig>>,
    buckets: DashMap<(String, String), Mutex<Bucket>>,
}

impl QuotaGate {
    pub fn new(spec: Option<WriteQuotaConfig>) -> Self {
        QuotaGate {
            default_spec: spec,
            overrides: DashMap::new(),
            buckets: DashMap::new(),
        }
    }

    fn rate_per_second(spec: &WriteQuotaConfig) -> f64 {
        spec.request_quota as f64 / spec.time_window_seconds.max(1) as f64
    }

    /// Install (or clear, with `quota: None`) a per-repository quota
    /// override, replacing whatever the server-wide default would have
    /// been for this one repository. Resets its bucket so the new
    /// capacity takes effect immediately rather than after a drain.
    pub fn set_quota(&self, project: &str, repo: &str, quota: Option<WriteQuotaConfig>) {
        let key = (project.to_string(), repo.to_string());
        self.overrides.insert(key.clone(), quota);
        self.buckets.remove(&key);
    }

    fn effective_spec(&self, project: &str, repo: &str) -> Option<WriteQuotaConfig> {
        match self.overrides.get(&(project.to_string(), repo.to_string())) {
            Some(over) => over.clone(),
            None => self.default_spec.clone(),
        }
    }

    /// Consume one write permit for `(project, repo)`. Returns
    /// [`CoreError::TooManyRequests`] if the bucket is empty.
    pub fn try_acquire(&self, project: &str, repo: &str) -> CoreResult<()> {
        let Some(spec) = self.effective_spec(project, repo) else {
            return Ok(());
        };
        let capacity = spec.request_quota as f64;
        let rate = Self::rate_per_second(&spec);
        let now = Instant::now();

        let key = (project.to_string(), repo.to_string());
        let entry = self
            .buckets
            .entry(key)
            .or_insert_with(|| Mutex::new(Bucket { tokens: capacity, last_refill: now }));
        let mut bucket = entry.lock().expect("quota bucket lock poisoned");

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(CoreError::TooManyRequests {
                project: project.to_string(),
                repo: repo.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_quota_always_bypasses() {
        let gate = QuotaGate::new(None);
        for _ in 0..1000 {
            assert!(gate.try_acquire("p", "r").is_ok());
        }
    }

    #[test]
    fn bucket_rejects_once_drained() {
        let gate = QuotaGate::new(Some(WriteQuotaConfig {
            request_quota: 2,
            time_window_seconds: 3600,
        }));
        assert!(gate.try_acquire("p", "r").is_ok());
        assert!(gate.try_acquire("p", "r").is_ok());
        assert!(matches!(
            gate.try_acquire("p", "r"),
            Err(CoreError::TooManyRequests { .. })
        ));
    }

    #[test]
    fn per_repository_override_replaces_the_default() {
        let gate = QuotaGate::new(Some(WriteQuotaConfig {
            request_quota: 1,
            time_window_seconds: 3600,
        }));
        assert!(gate.try_acquire("p", "r").is_ok());
        assert!(gate.try_acquire("p", "r").is_err());

        gate.set_quota("p", "r", None);
        for _ in 0..100 {
            assert!(gate.try_acquire("p", "r").is_ok());
        }
    }

    #[test]
    fn separate_repositories_have_independent_buckets() {
        let gate = QuotaGate::new(Some(WriteQuotaConfig {
            request_quota: 1,
            time_window_seconds: 3600,
        }));
        assert!(gate.try_acquire("p", "a").is_ok());
        assert!(gate.try_acquire("p", "b").is_ok());
        assert!(gate.try_acquire("p", "a").is_err());
    }
}
