//! Operator configuration, loaded from a YAML file
//!
//! ```yaml
//! app_namespace: apps
//! registry_secret_name: default-image-pull-secret
//! rootfs_version: "1.2.3"
//! application_service_account: app-runner
//! app_metrics_emission_interval_secs: 15
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default metrics emission interval
pub const DEFAULT_METRICS_INTERVAL_SECS: u64 = 15;

/// Default number of metric batches buffered for the consumer
pub const DEFAULT_METRICS_CHANNEL_CAPACITY: usize = 16;

/// Configuration shared by the desirer and the metrics pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Namespace new workloads are created in, in every mode
    pub app_namespace: String,
    /// Read across all namespaces instead of only `app_namespace`
    pub enable_multi_namespace_support: bool,
    /// Explicit kubeconfig; in-cluster/default inference when unset
    pub kube_config_path: Option<String>,
    /// Cluster-wide pull secret referenced by every pod template
    pub registry_secret_name: Option<String>,
    /// Stamped as a label on workloads and pods when set
    pub rootfs_version: Option<String>,
    /// Service account pods run as
    pub application_service_account: Option<String>,
    /// Escape hatch: let pods mount their service-account token
    pub unsafe_allow_automount_service_account_token: bool,
    /// Seconds between metric collections
    pub app_metrics_emission_interval_secs: u64,
    /// Bounded capacity of the metrics delivery channel
    pub metrics_channel_capacity: usize,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            app_namespace: String::new(),
            enable_multi_namespace_support: false,
            kube_config_path: None,
            registry_secret_name: None,
            rootfs_version: None,
            application_service_account: None,
            unsafe_allow_automount_service_account_token: false,
            app_metrics_emission_interval_secs: DEFAULT_METRICS_INTERVAL_SECS,
            metrics_channel_capacity: DEFAULT_METRICS_CHANNEL_CAPACITY,
        }
    }
}

impl OperatorConfig {
    /// Read and validate a YAML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml(&data)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
    }

    /// Parse and validate YAML config text
    pub fn from_yaml(data: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(data)
            .map_err(|e| Error::config(format!("failed to unmarshal yaml: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.app_namespace.is_empty() {
            return Err(Error::config("must set app_namespace"));
        }
        if self.app_metrics_emission_interval_secs == 0 {
            return Err(Error::config(
                "app_metrics_emission_interval_secs must be greater than 0",
            ));
        }
        if self.metrics_channel_capacity == 0 {
            return Err(Error::config("metrics_channel_capacity must be at least 1"));
        }
        Ok(())
    }

    /// Namespace list operations are restricted to, `None` for cluster-wide
    pub fn list_scope(&self) -> Option<&str> {
        if self.enable_multi_namespace_support {
            None
        } else {
            Some(self.app_namespace.as_str())
        }
    }

    /// Metrics emission interval
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.app_metrics_emission_interval_secs)
    }
}
