//! Controller configuration.
//!
//! The worker shape, finalizer tokens and timing knobs are fixed for a
//! running process: build one [`ControllerConfig`] at startup and share it
//! behind an `Arc`. Defaults reproduce the values the controller has
//! always shipped with.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::resource::PullPolicy;

pub const DEFAULT_NAME_PREFIX: &str = "rocket-source-pod-";
pub const DEFAULT_CONTAINER_NAME: &str = "rocket-source";
pub const DEFAULT_IMAGE: &str = "maxthom/rocket-source:latest";
pub const DEFAULT_APP_LABEL_KEY: &str = "app";
pub const DEFAULT_APP_LABEL_VALUE: &str = "rocket-source-pod";
pub const DEFAULT_ENDPOINT_ENV_KEY: &str = "NATS_SERVICE_PORT";
pub const DEFAULT_ENDPOINT: &str = "nats-server-service.default.svc.cluster.local:4222";
pub const DEFAULT_METRIC_ENV_KEY: &str = "METRIC_NAME";

pub const DEFAULT_TMSOURCE_FINALIZER: &str = "tmsource.finalizers.rocket.global";
pub const DEFAULT_SITE_FINALIZER: &str = "site.finalizers.rocket.global";

/// Longest accepted value for any timing knob.
pub const MAX_TIMING: Duration = Duration::from_secs(86_400);

/// Complete controller configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub worker: WorkerTemplate,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub finalizers: FinalizerNames,
}

/// Fixed parts of every worker the controller creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerTemplate {
    pub name_prefix: String,
    pub container_name: String,
    pub image: String,
    pub pull_policy: PullPolicy,
    pub app_label_key: String,
    pub app_label_value: String,
    pub endpoint_env_key: String,
    pub endpoint: String,
    pub metric_env_key: String,
}

impl Default for WorkerTemplate {
    fn default() -> Self {
        Self {
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            container_name: DEFAULT_CONTAINER_NAME.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            pull_policy: PullPolicy::Always,
            app_label_key: DEFAULT_APP_LABEL_KEY.to_string(),
            app_label_value: DEFAULT_APP_LABEL_VALUE.to_string(),
            endpoint_env_key: DEFAULT_ENDPOINT_ENV_KEY.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            metric_env_key: DEFAULT_METRIC_ENV_KEY.to_string(),
        }
    }
}

/// Timing knobs for termination waits and requeues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Interval between checks while waiting for a worker to disappear.
    #[serde(with = "duration_secs", default = "default_poll_interval")]
    pub termination_poll_interval: Duration,

    /// Upper bound on the termination wait; the wait gives up afterwards.
    #[serde(with = "duration_secs", default = "default_termination_wait")]
    pub termination_wait_max: Duration,

    /// Delay requested when a pass must be re-run.
    #[serde(with = "duration_secs", default = "default_requeue_delay")]
    pub requeue_delay: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            termination_poll_interval: default_poll_interval(),
            termination_wait_max: default_termination_wait(),
            requeue_delay: default_requeue_delay(),
        }
    }
}

impl TimingConfig {
    /// Number of polls the termination wait performs.
    pub fn termination_polls(&self) -> u32 {
        let interval = self.termination_poll_interval.as_millis().max(1);
        self.termination_wait_max
            .as_millis()
            .checked_div(interval)
            .and_then(|polls| u32::try_from(polls).ok())
            .unwrap_or(u32::MAX)
    }
}

/// Finalizer tokens guarding each resource kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalizerNames {
    pub tmsource: String,
    pub site: String,
}

impl Default for FinalizerNames {
    fn default() -> Self {
        Self {
            tmsource: DEFAULT_TMSOURCE_FINALIZER.to_string(),
            site: DEFAULT_SITE_FINALIZER.to_string(),
        }
    }
}

const fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

const fn default_termination_wait() -> Duration {
    Duration::from_secs(20)
}

const fn default_requeue_delay() -> Duration {
    Duration::from_secs(5)
}

impl ControllerConfig {
    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or fails validation.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| Error::toml_parse_failed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an override is malformed.
    pub fn with_env(self) -> Result<Self> {
        self.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Recognised: `ROCKETLAB_WORKER_IMAGE`, `ROCKETLAB_TRANSPORT_ENDPOINT`,
    /// `ROCKETLAB_REQUEUE_DELAY_SECS`.
    ///
    /// # Errors
    ///
    /// Returns an error if an override is malformed or the result is invalid.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(image) = lookup("ROCKETLAB_WORKER_IMAGE") {
            self.worker.image = image;
        }

        if let Some(endpoint) = lookup("ROCKETLAB_TRANSPORT_ENDPOINT") {
            self.worker.endpoint = endpoint;
        }

        if let Some(delay) = lookup("ROCKETLAB_REQUEUE_DELAY_SECS") {
            let secs = delay.trim().parse::<u64>().map_err(|e| {
                Error::invalid_config(format!("ROCKETLAB_REQUEUE_DELAY_SECS '{delay}': {e}"))
            })?;
            self.timing.requeue_delay = Duration::from_secs(secs);
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject configurations that cannot produce a usable worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.worker.name_prefix.is_empty() {
            return Err(Error::invalid_config("worker.name_prefix must not be empty"));
        }
        if self.worker.image.is_empty() {
            return Err(Error::invalid_config("worker.image must not be empty"));
        }
        if self.worker.endpoint_env_key == self.worker.metric_env_key {
            return Err(Error::invalid_config(
                "worker.endpoint_env_key and worker.metric_env_key must differ",
            ));
        }
        if self.finalizers.tmsource.is_empty() || self.finalizers.site.is_empty() {
            return Err(Error::invalid_config("finalizer names must not be empty"));
        }
        if self.timing.termination_poll_interval.is_zero() {
            return Err(Error::invalid_config(
                "timing.termination_poll_interval must be positive",
            ));
        }
        if self.timing.termination_wait_max < self.timing.termination_poll_interval {
            return Err(Error::invalid_config(
                "timing.termination_wait_max must be at least one poll interval",
            ));
        }
        let timings = [
            ("timing.termination_poll_interval", self.timing.termination_poll_interval),
            ("timing.termination_wait_max", self.timing.termination_wait_max),
            ("timing.requeue_delay", self.timing.requeue_delay),
        ];
        if let Some((name, _)) = timings.iter().find(|(_, value)| *value > MAX_TIMING) {
            return Err(Error::invalid_config(format!(
                "{name} must not exceed {}s",
                MAX_TIMING.as_secs()
            )));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.worker.name_prefix, "rocket-source-pod-");
        assert_eq!(config.worker.metric_env_key, "METRIC_NAME");
        assert_eq!(config.timing.termination_poll_interval, Duration::from_secs(1));
        assert_eq!(config.timing.termination_wait_max, Duration::from_secs(20));
        assert_eq!(config.timing.requeue_delay, Duration::from_secs(5));
        assert_eq!(config.timing.termination_polls(), 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ControllerConfig::from_toml_str(
            r#"
[worker]
image = "registry.local/rocket-source:1.2"

[timing]
requeue_delay = 10
"#,
        )
        .unwrap();

        assert_eq!(config.worker.image, "registry.local/rocket-source:1.2");
        assert_eq!(config.worker.container_name, "rocket-source");
        assert_eq!(config.timing.requeue_delay, Duration::from_secs(10));
        assert_eq!(config.timing.termination_wait_max, Duration::from_secs(20));
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let err = ControllerConfig::from_toml_str("[worker\nimage =").unwrap_err();
        assert!(matches!(err, Error::TomlParseFailed { .. }));
    }

    #[test]
    fn test_empty_image_fails_validation() {
        let err = ControllerConfig::from_toml_str("[worker]\nimage = \"\"\n").unwrap_err();
        assert!(err.to_string().contains("image"));
    }

    #[test]
    fn test_wait_shorter_than_interval_fails_validation() {
        let mut config = ControllerConfig::default();
        config.timing.termination_poll_interval = Duration::from_secs(5);
        config.timing.termination_wait_max = Duration::from_secs(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ROCKETLAB_WORKER_IMAGE", "custom:dev"),
            ("ROCKETLAB_REQUEUE_DELAY_SECS", "2"),
        ]
        .into_iter()
        .collect();

        let config = ControllerConfig::default()
            .with_env_overrides(|key| vars.get(key).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.worker.image, "custom:dev");
        assert_eq!(config.timing.requeue_delay, Duration::from_secs(2));
        assert_eq!(config.worker.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_malformed_env_override() {
        let result = ControllerConfig::default()
            .with_env_overrides(|key| (key == "ROCKETLAB_REQUEUE_DELAY_SECS").then(|| "soon".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_oversized_requeue_delay_is_rejected() {
        let max = u64::MAX.to_string();
        let err = ControllerConfig::default()
            .with_env_overrides(|key| (key == "ROCKETLAB_REQUEUE_DELAY_SECS").then(|| max.clone()))
            .unwrap_err();
        assert!(err.to_string().contains("timing.requeue_delay"));

        let config = ControllerConfig::from_toml_str("[timing]\nrequeue_delay = 86400\n").unwrap();
        assert_eq!(config.timing.requeue_delay, MAX_TIMING);
        assert!(ControllerConfig::from_toml_str("[timing]\nrequeue_delay = 86401\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rocketlab.toml");
        std::fs::write(&path, "[finalizers]\nsite = \"site.example/guard\"\n").unwrap();

        let config = ControllerConfig::load(&path).unwrap();
        assert_eq!(config.finalizers.site, "site.example/guard");
        assert_eq!(config.finalizers.tmsource, DEFAULT_TMSOURCE_FINALIZER);
    }

    #[test]
    fn test_load_missing_file() {
        let err = ControllerConfig::load("/nonexistent/rocketlab.toml").unwrap_err();
        assert!(matches!(err, Error::FileReadFailed { .. }));
    }
}
