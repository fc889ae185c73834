//! Server configuration types: plain `serde`-derived structs with
//! `Default` impls and a permissive deserializer for values that may
//! arrive as either a string or a number.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

/// Replication method selector (§6 `replication.method`).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplicationMethod {
    /// No replication log; single-replica, always writable.
    #[default]
    None,
    /// A coordinated replication log across multiple replicas.
    Coordinated,
}

/// `replication.*` options.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReplicationConfig {
    pub method: ReplicationMethod,
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(with = "duration_millis", default = "default_replication_timeout")]
    pub timeout: Duration,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    #[serde(default = "default_max_log_count")]
    pub max_log_count: usize,
    #[serde(with = "duration_millis", default = "default_min_log_age")]
    pub min_log_age: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            method: ReplicationMethod::None,
            servers: Vec::new(),
            server_id: None,
            secret: None,
            timeout: default_replication_timeout(),
            num_workers: default_num_workers(),
            max_log_count: default_max_log_count(),
            min_log_age: default_min_log_age(),
        }
    }
}

fn default_replication_timeout() -> Duration {
    Duration::from_millis(10_000)
}
fn default_num_workers() -> usize {
    16
}
fn default_max_log_count() -> usize {
    1024
}
fn default_min_log_age() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

/// `gracefulShutdownTimeout.*` options.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GracefulShutdownConfig {
    #[serde(with = "duration_millis")]
    pub quiet_period: Duration,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

impl Default for GracefulShutdownConfig {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_millis(1000),
            timeout: Duration::from_millis(2000),
        }
    }
}

/// `writeQuotaPerRepository.*` options. `None` means unlimited and must
/// bypass all token-bucket accounting (§4.7).
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct WriteQuotaConfig {
    pub request_quota: u32,
    pub time_window_seconds: u32,
}

/// `zone.*` options; presence of `current_zone` enables zone-leader plugins.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ZoneConfig {
    pub current_zone: Option<String>,
}

/// `repositoryCacheSpec`: maximum-weight, expire-after-access policy for
/// the in-memory materialized-tree cache (§B.1 of SPEC_FULL.md).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RepositoryCacheSpec {
    #[serde(deserialize_with = "string_or_usize")]
    pub maximum_weight: String,
    #[serde(with = "duration_millis", default = "default_expire_after_access")]
    pub expire_after_access: Duration,
}

impl Default for RepositoryCacheSpec {
    fn default() -> Self {
        Self {
            maximum_weight: "256MiB".to_string(),
            expire_after_access: default_expire_after_access(),
        }
    }
}

fn default_expire_after_access() -> Duration {
    Duration::from_secs(5 * 60)
}

/// Top-level server configuration (§6 "Configuration").
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    #[serde(default = "default_num_repository_workers")]
    pub num_repository_workers: usize,
    #[serde(default)]
    pub repository_cache_spec: RepositoryCacheSpec,
    #[serde(
        with = "duration_millis",
        default = "default_max_removed_repository_age"
    )]
    pub max_removed_repository_age: Duration,
    #[serde(default)]
    pub graceful_shutdown_timeout: GracefulShutdownConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub write_quota_per_repository: Option<WriteQuotaConfig>,
    #[serde(default)]
    pub zone: ZoneConfig,
}

fn default_ports() -> Vec<u16> {
    vec![36462]
}
fn default_num_repository_workers() -> usize {
    16
}
fn default_max_removed_repository_age() -> Duration {
    Duration::from_secs(60 * 60)
}

impl Config {
    /// Build a minimal config pointing at `data_dir`, everything else default.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ports: default_ports(),
            num_repository_workers: default_num_repository_workers(),
            repository_cache_spec: RepositoryCacheSpec::default(),
            max_removed_repository_age: default_max_removed_repository_age(),
            graceful_shutdown_timeout: GracefulShutdownConfig::default(),
            replication: ReplicationConfig::default(),
            write_quota_per_repository: None,
            zone: ZoneConfig::default(),
        }
    }
}

/// Accepts a value that may be serialized as either a string or a number,
/// normalizing it to a `String`. Used for byte-size specs like
/// `"256MiB"` that may also arrive as a bare integer of bytes.
fn string_or_usize<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrUSize {
        String(String),
        USize(usize),
    }

    Ok(match StringOrUSize::deserialize(deserializer)? {
        StringOrUSize::String(v) => v,
        StringOrUSize::USize(v) => v.to_string(),
    })
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
