use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: std::net::SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> std::net::SocketAddr {
    ([0, 0, 0, 0], 8080).into()
}

/// Admission bucket configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BucketConfig {
    /// Number of worker slots draining the admission queue
    #[serde(default = "default_bucket_size")]
    pub size: usize,
    /// Deadline for a request waiting on (and occupying) a slot
    #[serde(default = "default_bucket_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            size: default_bucket_size(),
            timeout_ms: default_bucket_timeout_ms(),
        }
    }
}

impl BucketConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.size == 0 {
            return Err(anyhow::anyhow!("bucket size must be greater than 0"));
        }
        if self.timeout_ms == 0 {
            return Err(anyhow::anyhow!("bucket timeout_ms must be greater than 0"));
        }
        Ok(())
    }
}

fn default_bucket_size() -> usize {
    64
}

fn default_bucket_timeout_ms() -> u64 {
    30_000
}
