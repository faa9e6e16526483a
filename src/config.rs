//! Control plane configuration
//!
//! Loaded from an optional YAML file; CLI flags override the top-level
//! fields. Drivers are only ever configured through the file.

use crate::error::{Error, Result};
use crate::pricing::StorageProtocol;
use crate::provisioning::{DelayPolicy, StateChangeConf};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Top-level Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Logical driver name routes fall back to
    pub base_name: String,
    /// REST API bind address
    pub api_addr: String,
    pub poll: PollConfig,
    pub drivers: Vec<DriverConfig>,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            base_name: "osd".to_string(),
            api_addr: "0.0.0.0:9005".to_string(),
            poll: PollConfig::default(),
            drivers: Vec::new(),
        }
    }
}

impl ControlPlaneConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_name.is_empty() {
            return Err(Error::Configuration("base_name must not be empty".into()));
        }
        self.poll.validate()?;

        let mut seen = HashSet::new();
        for driver in &self.drivers {
            if driver.name().is_empty() {
                return Err(Error::Configuration("driver name must not be empty".into()));
            }
            if !seen.insert(driver.name()) {
                return Err(Error::Configuration(format!(
                    "driver {} configured more than once",
                    driver.name()
                )));
            }
        }
        Ok(())
    }

    /// Drivers to register when none are configured: a local driver under
    /// the base name
    pub fn effective_drivers(&self) -> Vec<DriverConfig> {
        if self.drivers.is_empty() {
            vec![DriverConfig::Local(LocalDriverConfig {
                name: self.base_name.clone(),
                ..Default::default()
            })]
        } else {
            self.drivers.clone()
        }
    }
}

// =============================================================================
// Polling
// =============================================================================

/// Bounds for provisioning waits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub timeout_secs: u64,
    pub delay_secs: u64,
    pub min_poll_interval_secs: u64,
    /// Consecutive "not yet indexed" lookups tolerated
    pub not_found_checks: u32,
    /// Grow the delay exponentially instead of polling at a fixed rate
    pub backoff: bool,
    pub backoff_multiplier: f64,
    pub max_delay_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 45 * 60,
            delay_secs: 10,
            min_poll_interval_secs: 10,
            not_found_checks: 300,
            backoff: false,
            backoff_multiplier: 2.0,
            max_delay_secs: 120,
        }
    }
}

impl PollConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(Error::Configuration("poll timeout must be greater than 0".into()));
        }
        if self.delay_secs == 0 && self.min_poll_interval_secs == 0 {
            return Err(Error::Configuration(
                "poll delay and min poll interval must not both be 0".into(),
            ));
        }
        let multiplier = self.backoff_multiplier;
        if self.backoff && !(multiplier.is_finite() && multiplier >= 1.0) {
            return Err(Error::Configuration(format!(
                "backoff multiplier must be a finite number of at least 1.0, got {}",
                multiplier
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_secs(self.min_poll_interval_secs)
    }

    pub fn delay_policy(&self) -> DelayPolicy {
        if self.backoff {
            DelayPolicy::Exponential {
                multiplier: self.backoff_multiplier,
                max_delay: Duration::from_secs(self.max_delay_secs),
            }
        } else {
            DelayPolicy::Fixed
        }
    }

    /// Base wait parameters for `action`; callers add labels and grace
    pub fn state_change(&self, action: impl Into<String>) -> StateChangeConf {
        StateChangeConf::new(action)
            .timeout(self.timeout())
            .delay(self.delay())
            .min_poll_interval(self.min_poll_interval())
            .delay_policy(self.delay_policy())
    }
}

// =============================================================================
// Drivers
// =============================================================================

/// One registered driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DriverConfig {
    Local(LocalDriverConfig),
    Softlayer(SoftLayerDriverConfig),
    Unsupported { name: String },
}

impl DriverConfig {
    pub fn name(&self) -> &str {
        match self {
            DriverConfig::Local(c) => &c.name,
            DriverConfig::Softlayer(c) => &c.name,
            DriverConfig::Unsupported { name } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalDriverConfig {
    pub name: String,
    /// Device paths are this prefix plus a letter
    pub device_prefix: String,
    pub first_device: char,
    pub last_device: char,
    pub root_device: String,
}

impl Default for LocalDriverConfig {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            device_prefix: "/dev/xvd".to_string(),
            first_device: 'f',
            last_device: 'p',
            root_device: "/dev/xvda".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftLayerDriverConfig {
    pub name: String,
    /// Datacenter short name orders are placed in
    pub datacenter: String,
    pub protocol: StorageProtocol,
    /// Status polls the simulated vendor reports before completing
    pub provisioning_polls: u32,
    /// Order-id lookups that miss before the volume is indexed
    pub index_lag_polls: u32,
}

impl Default for SoftLayerDriverConfig {
    fn default() -> Self {
        Self {
            name: "softlayer".to_string(),
            datacenter: "dal09".to_string(),
            protocol: StorageProtocol::Block,
            provisioning_polls: 2,
            index_lag_polls: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ControlPlaneConfig::default();
        assert_eq!(config.base_name, "osd");
        assert_eq!(config.poll.timeout(), Duration::from_secs(2700));
        assert_eq!(config.poll.not_found_checks, 300);
        assert_eq!(config.poll.delay_policy(), DelayPolicy::Fixed);

        let drivers = config.effective_drivers();
        assert_eq!(drivers.len(), 1);
        assert_eq!(drivers[0].name(), "osd");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
base_name: osd
poll:
  timeout_secs: 60
  backoff: true
drivers:
  - kind: local
    name: osd
  - kind: softlayer
    name: osd-sched
    datacenter: wdc07
  - kind: unsupported
    name: vsphere
"#
        )
        .unwrap();

        let config = ControlPlaneConfig::from_file(file.path()).unwrap();
        assert_eq!(config.poll.timeout_secs, 60);
        assert_eq!(config.poll.delay_secs, 10);
        assert!(matches!(config.poll.delay_policy(), DelayPolicy::Exponential { .. }));
        assert_eq!(config.drivers.len(), 3);
        match &config.drivers[1] {
            DriverConfig::Softlayer(c) => {
                assert_eq!(c.datacenter, "wdc07");
                assert_eq!(c.protocol, StorageProtocol::Block);
            }
            other => panic!("unexpected driver {:?}", other),
        }
        assert_eq!(config.drivers[2].name(), "vsphere");
    }

    #[test]
    fn test_duplicate_driver_names_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "drivers:\n  - kind: local\n    name: osd\n  - kind: unsupported\n    name: osd\n"
        )
        .unwrap();

        let err = ControlPlaneConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ControlPlaneConfig::from_file(dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_poll_validation() {
        assert!(PollConfig::default().validate().is_ok());

        let busy_loop = PollConfig {
            delay_secs: 0,
            min_poll_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(busy_loop.validate(), Err(Error::Configuration(_))));

        let floored = PollConfig {
            delay_secs: 0,
            min_poll_interval_secs: 1,
            ..Default::default()
        };
        assert!(floored.validate().is_ok());

        for multiplier in [f64::NAN, f64::INFINITY, 0.5] {
            let poll = PollConfig {
                backoff: true,
                backoff_multiplier: multiplier,
                ..Default::default()
            };
            assert!(matches!(poll.validate(), Err(Error::Configuration(_))));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_timeout_does_not_panic() {
        let poll = PollConfig {
            timeout_secs: u64::MAX,
            ..Default::default()
        };
        assert!(poll.validate().is_ok());

        let result = poll
            .state_change("wait")
            .target("done")
            .wait_for_state(&crate::provisioning::TokioClock, || async {
                Ok(crate::provisioning::Observation::state("done", 1))
            })
            .await;
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_state_change_from_poll_config() {
        let poll = PollConfig {
            timeout_secs: 5,
            delay_secs: 1,
            min_poll_interval_secs: 2,
            ..Default::default()
        };
        let conf = poll.state_change("wait");
        assert_eq!(conf.timeout, Duration::from_secs(5));
        assert_eq!(conf.min_poll_interval, Duration::from_secs(2));
        assert_eq!(conf.not_found_checks, None);
    }
}
