//! LRP desired-state model and observed instance facts

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::labels::{LABEL_GUID, LABEL_VERSION};

/// Stable identity of one deployable generation of an application
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LrpIdentifier {
    /// Application process GUID
    pub guid: String,
    /// Version; a change denotes a new generation of the same app
    pub version: String,
}

impl LrpIdentifier {
    /// Create an identifier from its parts
    pub fn new(guid: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            version: version.into(),
        }
    }

    /// Label selector matching every object stamped with this identity
    pub fn label_selector(&self) -> String {
        format!(
            "{}={},{}={}",
            LABEL_GUID, self.guid, LABEL_VERSION, self.version
        )
    }
}

impl fmt::Display for LrpIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.guid, self.version)
    }
}

/// Kind of health check attached to the application container
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckType {
    /// TCP connect to `port`
    #[default]
    Port,
    /// HTTP GET on `endpoint` at `port`
    Http,
    /// No probes
    None,
}

/// Health check declaration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheck {
    /// Check kind
    #[serde(rename = "type")]
    pub type_: HealthCheckType,
    /// Container port to check
    pub port: i32,
    /// HTTP path, for `http` checks
    pub endpoint: String,
    /// Start-up grace in milliseconds
    pub timeout_ms: u32,
}

/// Credentials for pulling the image from a private registry
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateRegistry {
    /// Registry server, e.g. `index.docker.io/v1/`
    pub server: String,
    /// Registry user
    pub username: String,
    /// Registry password
    pub password: String,
}

impl fmt::Debug for PrivateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateRegistry")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Persistent volume claim mounted into the application container
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Name of an existing PersistentVolumeClaim
    pub claim_name: String,
    /// Where to mount it
    pub mount_path: String,
}

/// The fixed set of caller metadata the bridge persists and reads back.
///
/// Anything outside these fields is not retained.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LrpMetadata {
    /// Process GUID
    pub process_guid: String,
    /// Last-updated marker; allowed to change on update
    pub last_updated: String,
    /// Declared routes, an opaque payload; allowed to change on update
    pub app_uris: String,
    /// Application id
    pub app_id: String,
    /// Application version
    pub version: String,
    /// Application name
    pub app_name: String,
}

/// Long-running process desired state
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lrp {
    /// Identity
    #[serde(flatten)]
    pub identifier: LrpIdentifier,
    /// Human-readable application name
    pub app_name: String,
    /// Space name
    pub space_name: String,
    /// Space GUID
    pub space_guid: String,
    /// Org name
    pub org_name: String,
    /// Org GUID
    pub org_guid: String,
    /// Container argv
    pub command: Vec<String>,
    /// Container image reference
    pub image: String,
    /// Declared environment
    pub env: BTreeMap<String, String>,
    /// Container ports, in declaration order
    pub ports: Vec<i32>,
    /// Desired number of instances
    pub target_instances: u32,
    /// Observed ready instances; informational only
    pub running_instances: u32,
    /// Memory envelope in megabytes
    pub memory_mb: u64,
    /// Ephemeral disk envelope in megabytes
    pub disk_mb: u64,
    /// Relative CPU weight
    pub cpu_weight: u32,
    /// Health check
    pub health: HealthCheck,
    /// Whether the image must run as root
    pub runs_as_root: bool,
    /// Private registry credentials
    pub private_registry: Option<PrivateRegistry>,
    /// Volume mounts, in declaration order
    pub volume_mounts: Vec<VolumeMount>,
    /// Persisted caller metadata
    pub metadata: LrpMetadata,
    /// The original serialized request; never returned on reads
    #[serde(rename = "lrp")]
    pub raw_request: String,
}

impl Lrp {
    /// The LRP's identity
    pub fn id(&self) -> &LrpIdentifier {
        &self.identifier
    }
}

/// Reported state of an instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    /// Pod exists and is not being torn down
    Running,
    /// State could not be determined
    Unknown,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Observed runtime fact about one ordinal instance.
///
/// Recomputed on every read; never cache across cluster mutations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Ordinal index
    pub index: u32,
    /// Start time in nanoseconds since the epoch, 0 when unknown
    pub since: i64,
    /// Reported state
    pub state: InstanceState,
}
