//! Controller configuration.
//!
//! Read once at startup from environment variables. Every value has a default
//! except where noted; malformed values fail startup with `InvalidConfig`.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ControllerError;

/// CronJob concurrency policy applied to recurring units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyPolicy {
    /// Overlapping runs allowed
    Allow,
    /// Skip a run while the previous one is active
    Forbid,
    /// Cancel the active run and start the new one
    #[default]
    Replace,
}

impl ConcurrencyPolicy {
    /// Value for `CronJobSpec.concurrencyPolicy`
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcurrencyPolicy::Allow => "Allow",
            ConcurrencyPolicy::Forbid => "Forbid",
            ConcurrencyPolicy::Replace => "Replace",
        }
    }
}

impl FromStr for ConcurrencyPolicy {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Ok(ConcurrencyPolicy::Allow),
            "forbid" => Ok(ConcurrencyPolicy::Forbid),
            "replace" => Ok(ConcurrencyPolicy::Replace),
            other => Err(ControllerError::InvalidConfig(format!(
                "CRON_CONCURRENCY_POLICY must be Allow, Forbid or Replace, got '{other}'"
            ))),
        }
    }
}

/// Runtime configuration for the controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches all namespaces
    pub watch_namespace: Option<String>,
    /// Image of the in-pod agent
    pub agent_image: String,
    /// Agent binary name, run as `/usr/bin/<name>`
    pub agent_binary: String,
    /// Service account the execution units run as
    pub agent_service_account: String,
    /// Host path of the container runtime socket
    pub runtime_socket: String,
    /// Secret holding the kubeconfig mounted into recurring units
    pub kubeconfig_secret: String,
    /// Concurrency policy for CronJobs
    pub cron_concurrency_policy: ConcurrencyPolicy,
    /// Directory capture artifacts are written to when the intent names none
    pub capture_output_dir: String,
    /// Capture length when the intent gives no duration
    pub capture_default_duration: Duration,
    /// Path to `crictl`
    pub crictl_path: String,
    /// Path to `nsenter`
    pub nsenter_path: String,
    /// Path to `tcpdump`
    pub tcpdump_path: String,
    /// Path to `ip`
    pub ip_path: String,
    /// Default image of the relay sink
    pub data_endpoint_image: String,
    /// Listen address of the probe and metrics server
    pub probe_addr: SocketAddr,
    /// Concurrent reconciles per watcher
    pub reconcile_concurrency: u16,
    /// Backoff floor in seconds
    pub backoff_min_secs: u64,
    /// Backoff ceiling in seconds
    pub backoff_max_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            agent_image: "ghcr.io/microscaler/podtracer:latest".to_string(),
            agent_binary: "podtracer".to_string(),
            agent_service_account: "fleetcap-agent".to_string(),
            runtime_socket: "/var/run/crio/crio.sock".to_string(),
            kubeconfig_secret: "podtracer-kubeconfig".to_string(),
            cron_concurrency_policy: ConcurrencyPolicy::Replace,
            capture_output_dir: "/var/lib/fleetcap/pcap".to_string(),
            capture_default_duration: Duration::from_secs(60),
            crictl_path: "crictl".to_string(),
            nsenter_path: "nsenter".to_string(),
            tcpdump_path: "tcpdump".to_string(),
            ip_path: "ip".to_string(),
            data_endpoint_image: "ghcr.io/microscaler/fleetcap-data-endpoint:latest".to_string(),
            probe_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            reconcile_concurrency: 3,
            backoff_min_secs: 5,
            backoff_max_secs: 300,
        }
    }
}

fn parse<T: FromStr>(name: &str, raw: &str) -> Result<T, ControllerError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ControllerError::InvalidConfig(format!("{name}='{raw}': {e}")))
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.watch_namespace = get("WATCH_NAMESPACE");
        if let Some(v) = get("AGENT_IMAGE") {
            config.agent_image = v;
        }
        if let Some(v) = get("AGENT_BINARY") {
            config.agent_binary = v;
        }
        if let Some(v) = get("AGENT_SERVICE_ACCOUNT") {
            config.agent_service_account = v;
        }
        if let Some(v) = get("RUNTIME_SOCKET") {
            config.runtime_socket = v;
        }
        if let Some(v) = get("KUBECONFIG_SECRET") {
            config.kubeconfig_secret = v;
        }
        if let Some(v) = get("CRON_CONCURRENCY_POLICY") {
            config.cron_concurrency_policy = v.parse()?;
        }
        if let Some(v) = get("CAPTURE_OUTPUT_DIR") {
            config.capture_output_dir = v;
        }
        if let Some(v) = get("CAPTURE_DEFAULT_DURATION_SECS") {
            let secs: u64 = parse("CAPTURE_DEFAULT_DURATION_SECS", &v)?;
            config.capture_default_duration = Duration::from_secs(secs);
        }
        if let Some(v) = get("CRICTL_PATH") {
            config.crictl_path = v;
        }
        if let Some(v) = get("NSENTER_PATH") {
            config.nsenter_path = v;
        }
        if let Some(v) = get("TCPDUMP_PATH") {
            config.tcpdump_path = v;
        }
        if let Some(v) = get("IP_PATH") {
            config.ip_path = v;
        }
        if let Some(v) = get("DATA_ENDPOINT_IMAGE") {
            config.data_endpoint_image = v;
        }
        if let Some(v) = get("PROBE_ADDR") {
            config.probe_addr = parse("PROBE_ADDR", &v)?;
        }
        if let Some(v) = get("RECONCILE_CONCURRENCY") {
            config.reconcile_concurrency = parse("RECONCILE_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("BACKOFF_MIN_SECS") {
            config.backoff_min_secs = parse("BACKOFF_MIN_SECS", &v)?;
        }
        if let Some(v) = get("BACKOFF_MAX_SECS") {
            config.backoff_max_secs = parse("BACKOFF_MAX_SECS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.capture_default_duration.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "CAPTURE_DEFAULT_DURATION_SECS must be greater than zero".to_string(),
            ));
        }
        if self.reconcile_concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be greater than zero".to_string(),
            ));
        }
        if self.backoff_min_secs == 0 || self.backoff_min_secs > self.backoff_max_secs {
            return Err(ControllerError::InvalidConfig(format!(
                "backoff bounds must satisfy 0 < BACKOFF_MIN_SECS ({}) <= BACKOFF_MAX_SECS ({})",
                self.backoff_min_secs, self.backoff_max_secs
            )));
        }
        if self.agent_binary.contains('/') {
            return Err(ControllerError::InvalidConfig(
                "AGENT_BINARY is a file name under /usr/bin, not a path".to_string(),
            ));
        }
        Ok(())
    }

    /// Absolute path of the agent entrypoint inside its image
    pub fn agent_entrypoint(&self) -> String {
        format!("/usr/bin/{}", self.agent_binary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ControllerConfig, ControllerError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ControllerConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert!(config.watch_namespace.is_none());
        assert_eq!(config.cron_concurrency_policy, ConcurrencyPolicy::Replace);
        assert_eq!(config.capture_default_duration, Duration::from_secs(60));
        assert_eq!(config.agent_entrypoint(), "/usr/bin/podtracer");
        assert_eq!(config.probe_addr.port(), 8080);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("WATCH_NAMESPACE", "ops"),
            ("CRON_CONCURRENCY_POLICY", "forbid"),
            ("CAPTURE_DEFAULT_DURATION_SECS", "15"),
            ("PROBE_ADDR", "127.0.0.1:9000"),
            ("RECONCILE_CONCURRENCY", "8"),
        ])
        .unwrap();
        assert_eq!(config.watch_namespace.as_deref(), Some("ops"));
        assert_eq!(config.cron_concurrency_policy, ConcurrencyPolicy::Forbid);
        assert_eq!(config.capture_default_duration, Duration::from_secs(15));
        assert_eq!(config.probe_addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.reconcile_concurrency, 8);
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = load(&[("WATCH_NAMESPACE", "  "), ("AGENT_IMAGE", "")]).unwrap();
        assert!(config.watch_namespace.is_none());
        assert_eq!(config.agent_image, ControllerConfig::default().agent_image);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            load(&[("CRON_CONCURRENCY_POLICY", "sometimes")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            load(&[("CAPTURE_DEFAULT_DURATION_SECS", "soon")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            load(&[("BACKOFF_MIN_SECS", "600"), ("BACKOFF_MAX_SECS", "60")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            load(&[("AGENT_BINARY", "/opt/agent")]),
            Err(ControllerError::InvalidConfig(_))
        ));
    }
}
