//! Process configuration: worker pool sizing and per-call LLM deadline.
//!
//! Config *loading* from environment variables (DB URL, API keys, CORS
//! origin, JWT secret) is an operator concern external to the core
//! (`spec.md` §6); this struct only carries the tunables the core itself
//! defines defaults for (`spec.md` §5), loadable from a TOML file via the
//! teacher's `toml` dependency.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingConfig {
    /// Worker pool size (`spec.md` §5: typical `W=5`).
    pub worker_count: usize,
    /// Bounded job queue capacity (`spec.md` §5: typical `Q=100`).
    pub queue_capacity: usize,
    /// Per-evaluator LLM call deadline, in seconds (`spec.md` §5: default 60s).
    pub llm_call_timeout_secs: u64,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            worker_count: 5,
            queue_capacity: 100,
            llm_call_timeout_secs: 60,
        }
    }
}

impl GradingConfig {
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn llm_call_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_call_timeout_secs)
    }
}
