//! Client configuration
//!
//! Defaults match the hosted backend's local development setup. Every field
//! can be overridden through `RISKSENSE_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Shortest drain tick we allow. `tokio::time::interval` panics on zero and
/// anything shorter turns the emitter into a busy loop.
pub const MIN_DRAIN_TICK: Duration = Duration::from_millis(1);

/// Shortest poll interval we allow
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cadence of the token drain buffer
#[derive(Debug, Clone, PartialEq)]
pub struct DrainConfig {
    /// Interval between single-character flushes
    pub tick: Duration,
    /// Interval of the completion check once the network is done
    pub completion_check: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            tick: MIN_DRAIN_TICK,
            completion_check: Duration::from_millis(100),
        }
    }
}

impl DrainConfig {
    /// Tick interval clamped to the supported minimum
    pub fn effective_tick(&self) -> Duration {
        self.tick.max(MIN_DRAIN_TICK)
    }

    pub fn effective_completion_check(&self) -> Duration {
        self.completion_check.max(MIN_DRAIN_TICK)
    }
}

/// Limits applied to documents that never reach a terminal status
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Drop a document from the working set after this many failed status
    /// queries in a row. `None` retries forever.
    pub max_consecutive_failures: Option<u32>,
    /// Drop a document after this many non-terminal responses. `None` polls
    /// until the backend reports a terminal status.
    pub max_polls: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: Some(10),
            max_polls: None,
        }
    }
}

/// Cadence of the document status poller
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    pub interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(3500),
            retry: RetryPolicy::default(),
        }
    }
}

impl PollConfig {
    pub fn effective_interval(&self) -> Duration {
        self.interval.max(MIN_POLL_INTERVAL)
    }
}

/// Top-level client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// API root, including the version prefix
    pub base_url: String,
    /// Whole-request timeout, streamed bodies included
    pub timeout_secs: u64,
    pub drain: DrainConfig,
    pub poll: PollConfig,
    /// Where the signed-in session is persisted. `None` uses the user data dir.
    pub session_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api/v1".to_string(),
            timeout_secs: 300,
            drain: DrainConfig::default(),
            poll: PollConfig::default(),
            session_path: None,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `RISKSENSE_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each known key.
    /// Unparseable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("RISKSENSE_API_URL") {
            config.base_url = url;
        }
        if let Some(secs) = parse_var(&lookup, "RISKSENSE_TIMEOUT_SECS") {
            config.timeout_secs = secs;
        }
        if let Some(ms) = parse_var(&lookup, "RISKSENSE_DRAIN_TICK_MS") {
            config.drain.tick = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "RISKSENSE_POLL_INTERVAL_MS") {
            config.poll.interval = Duration::from_millis(ms);
        }
        if let Some(max) = parse_var(&lookup, "RISKSENSE_POLL_MAX_FAILURES") {
            config.poll.retry.max_consecutive_failures = if max == 0 { None } else { Some(max as u32) };
        }
        if let Some(path) = lookup("RISKSENSE_SESSION_FILE") {
            config.session_path = Some(PathBuf::from(path));
        }

        config.base_url = config.base_url.trim_end_matches('/').to_string();
        config
    }

    /// Resolved location of the session file
    pub fn session_file(&self) -> PathBuf {
        self.session_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("risksense")
                .join("session.json")
        })
    }
}

fn parse_var<F>(lookup: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(e) => {
            log::warn!("Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_overrides() {
        let config = ClientConfig::from_lookup(|_| None);
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.poll.interval, Duration::from_millis(3500));
    }

    #[test]
    fn test_env_overrides() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("RISKSENSE_API_URL", "https://risk.example.com/api/v1/"),
            ("RISKSENSE_POLL_INTERVAL_MS", "1000"),
            ("RISKSENSE_POLL_MAX_FAILURES", "0"),
            ("RISKSENSE_SESSION_FILE", "/tmp/rs.json"),
        ]));
        assert_eq!(config.base_url, "https://risk.example.com/api/v1");
        assert_eq!(config.poll.interval, Duration::from_millis(1000));
        assert_eq!(config.poll.retry.max_consecutive_failures, None);
        assert_eq!(config.session_file(), PathBuf::from("/tmp/rs.json"));
    }

    #[test]
    fn test_bad_values_are_ignored() {
        let config = ClientConfig::from_lookup(lookup_from(&[("RISKSENSE_TIMEOUT_SECS", "soon")]));
        assert_eq!(config.timeout_secs, 300);
    }

    #[test]
    fn test_zero_drain_tick_is_clamped() {
        let drain = DrainConfig {
            tick: Duration::ZERO,
            completion_check: Duration::ZERO,
        };
        assert_eq!(drain.effective_tick(), MIN_DRAIN_TICK);
        assert_eq!(drain.effective_completion_check(), MIN_DRAIN_TICK);
    }
}
