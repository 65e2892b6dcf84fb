//! Agent configuration.
//!
//! Everything comes from the pod environment. The proxy identity and the
//! time-to-live are required; the rest has defaults.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::directory::ReadinessPolicy;
use crate::lifecycle::{DrainTimings, LifecycleMode};

pub const DEFAULT_DRAIN_LOCK_DIR: &str = "/tmp/drain-lock";
pub const DEFAULT_LISTEN_ADDR: &str = "[::]:25577";
pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;

/// Namespace and name of the `Proxy` resource this agent serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyIdentity {
    pub namespace: String,
    pub name: String,
}

impl ProxyIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ProxyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Agent configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    pub proxy: ProxyIdentity,

    /// Time-to-live of the proxy process.
    pub ttl: Duration,

    /// How the proxy leaves the accepting phase.
    pub lifecycle: LifecycleMode,

    /// What happens to a registered backend that stops being ready.
    pub readiness_policy: ReadinessPolicy,

    /// Directory receiving the drain marker file.
    pub drain_lock_dir: PathBuf,

    /// Address the front listener binds to.
    pub listen_addr: SocketAddr,

    /// Max concurrent player connections on the front listener.
    pub max_connections: usize,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).with_context(|| format!("No {key} found in environment"))
        };

        let namespace = required("SHULKER_PROXY_NAMESPACE")?;
        let name = required("SHULKER_PROXY_NAME")?;

        let ttl_secs: u64 = required("SHULKER_PROXY_TTL_SECONDS")?
            .trim()
            .parse()
            .context("SHULKER_PROXY_TTL_SECONDS must be an integer (seconds).")?;
        let ttl = Duration::from_secs(ttl_secs);

        let seconds = |key: &str| -> Result<Option<Duration>> {
            lookup(key)
                .map(|v| v.trim().parse::<u64>())
                .transpose()
                .with_context(|| format!("{key} must be an integer (seconds)."))
                .map(|v| v.map(Duration::from_secs))
        };

        let lifecycle = match lookup("SHULKER_PROXY_LIFECYCLE").as_deref() {
            None | Some("drain") => {
                let defaults = DrainTimings::with_force_stop(ttl);
                let timings = DrainTimings {
                    delay: seconds("SHULKER_DRAIN_DELAY_SECONDS")?.unwrap_or(defaults.delay),
                    poll_interval: seconds("SHULKER_DRAIN_POLL_INTERVAL_SECONDS")?
                        .unwrap_or(defaults.poll_interval)
                        .max(Duration::from_secs(1)),
                    force_stop_after: seconds("SHULKER_DRAIN_FORCE_STOP_SECONDS")?
                        .unwrap_or(defaults.force_stop_after),
                };
                if timings.delay > timings.force_stop_after {
                    bail!(
                        "SHULKER_DRAIN_DELAY_SECONDS ({}s) must not exceed SHULKER_DRAIN_FORCE_STOP_SECONDS ({}s).",
                        timings.delay.as_secs(),
                        timings.force_stop_after.as_secs()
                    );
                }
                LifecycleMode::Drain(timings)
            }
            Some("ttl") => LifecycleMode::Ttl(ttl),
            Some(other) => {
                bail!("SHULKER_PROXY_LIFECYCLE must be 'drain' or 'ttl', got '{other}'.")
            }
        };

        let readiness_policy = match lookup("SHULKER_READINESS_POLICY") {
            Some(v) => v.parse().context(
                "SHULKER_READINESS_POLICY must be 'retain-until-deleted' or 'unregister-when-not-ready'.",
            )?,
            None => ReadinessPolicy::default(),
        };

        let drain_lock_dir = lookup("SHULKER_DRAIN_LOCK_DIR")
            .unwrap_or_else(|| DEFAULT_DRAIN_LOCK_DIR.to_string())
            .into();

        let listen_addr = lookup("SHULKER_PROXY_LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .context("SHULKER_PROXY_LISTEN_ADDR must be a socket address.")?;

        let max_connections: usize = lookup("SHULKER_PROXY_MAX_CONNECTIONS")
            .map(|v| v.parse())
            .transpose()
            .context("SHULKER_PROXY_MAX_CONNECTIONS must be an integer.")?
            .unwrap_or(DEFAULT_MAX_CONNECTIONS)
            .max(1);

        let log_level = lookup("SHULKER_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            proxy: ProxyIdentity::new(namespace, name),
            ttl,
            lifecycle,
            readiness_policy,
            drain_lock_dir,
            listen_addr,
            max_connections,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("SHULKER_PROXY_NAMESPACE", "games"),
        ("SHULKER_PROXY_NAME", "proxy-0"),
        ("SHULKER_PROXY_TTL_SECONDS", "86400"),
    ];

    #[test]
    fn test_required_only_uses_defaults() {
        let config = load(&REQUIRED).unwrap();
        assert_eq!(config.proxy, ProxyIdentity::new("games", "proxy-0"));
        assert_eq!(config.proxy.to_string(), "games/proxy-0");
        assert_eq!(config.ttl, Duration::from_secs(86400));
        assert_eq!(config.readiness_policy, ReadinessPolicy::RetainUntilDeleted);
        assert_eq!(config.drain_lock_dir, PathBuf::from(DEFAULT_DRAIN_LOCK_DIR));
        assert_eq!(config.listen_addr.port(), 25577);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);

        match config.lifecycle {
            LifecycleMode::Drain(timings) => {
                assert_eq!(timings.delay, Duration::ZERO);
                assert_eq!(timings.poll_interval, Duration::from_secs(30));
                assert_eq!(timings.force_stop_after, Duration::from_secs(86400));
            }
            other => panic!("Expected drain lifecycle, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_required_values_fail() {
        for skipped in 0..REQUIRED.len() {
            let vars: Vec<_> = REQUIRED
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skipped)
                .map(|(_, kv)| *kv)
                .collect();
            let err = load(&vars).unwrap_err();
            assert!(err.to_string().contains(REQUIRED[skipped].0));
        }
    }

    #[test]
    fn test_non_integer_ttl_fails() {
        let err = load(&[
            ("SHULKER_PROXY_NAMESPACE", "games"),
            ("SHULKER_PROXY_NAME", "proxy-0"),
            ("SHULKER_PROXY_TTL_SECONDS", "one day"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("SHULKER_PROXY_TTL_SECONDS"));
    }

    #[test]
    fn test_ttl_lifecycle() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("SHULKER_PROXY_LIFECYCLE", "ttl"));
        let config = load(&vars).unwrap();
        assert!(matches!(config.lifecycle, LifecycleMode::Ttl(d) if d == Duration::from_secs(86400)));
    }

    #[test]
    fn test_unknown_lifecycle_fails() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("SHULKER_PROXY_LIFECYCLE", "forever"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_drain_overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("SHULKER_DRAIN_DELAY_SECONDS", "5"),
            ("SHULKER_DRAIN_POLL_INTERVAL_SECONDS", "0"),
            ("SHULKER_DRAIN_FORCE_STOP_SECONDS", "600"),
            ("SHULKER_READINESS_POLICY", "unregister-when-not-ready"),
            ("SHULKER_DRAIN_LOCK_DIR", "/mnt/drain-lock"),
        ]);
        let config = load(&vars).unwrap();

        let LifecycleMode::Drain(timings) = config.lifecycle else {
            panic!("Expected drain lifecycle");
        };
        assert_eq!(timings.delay, Duration::from_secs(5));
        assert_eq!(timings.poll_interval, Duration::from_secs(1));
        assert_eq!(timings.force_stop_after, Duration::from_secs(600));
        assert_eq!(
            config.readiness_policy,
            ReadinessPolicy::UnregisterWhenNotReady
        );
        assert_eq!(config.drain_lock_dir, PathBuf::from("/mnt/drain-lock"));
    }

    #[test]
    fn test_bad_optional_value_fails() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("SHULKER_DRAIN_DELAY_SECONDS", "soon"));
        let err = load(&vars).unwrap_err();
        assert!(err.to_string().contains("SHULKER_DRAIN_DELAY_SECONDS"));
    }

    #[test]
    fn test_drain_delay_past_force_stop_fails() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("SHULKER_DRAIN_DELAY_SECONDS", "600"),
            ("SHULKER_DRAIN_FORCE_STOP_SECONDS", "120"),
        ]);
        let err = load(&vars).unwrap_err();
        assert!(err.to_string().contains("SHULKER_DRAIN_FORCE_STOP_SECONDS"));

        // Equal values are allowed.
        vars.pop();
        vars.push(("SHULKER_DRAIN_FORCE_STOP_SECONDS", "600"));
        assert!(load(&vars).is_ok());
    }
}
