//! Typed payloads carried by compiled resources
//!
//! These types appear in two places: inside template documents, where the
//! user writes them, and inside compiled resources, where the engine and
//! the diff compare them field by field. Keeping one definition for both
//! sides means a template round-trips into the store without lossy
//! conversion.

use serde::{Deserialize, Serialize};

use crate::error::ValidationErrors;

/// Payload of a cluster resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Kubernetes version the cluster runs
    pub kubernetes_version: String,

    /// Talos version installed on every machine
    pub talos_version: String,

    /// Optional cluster-wide feature toggles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<ClusterFeatures>,
}

/// Cluster-wide feature toggles
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterFeatures {
    /// Encrypt machine disks with cluster-managed keys
    #[serde(default, skip_serializing_if = "is_false")]
    pub disk_encryption: bool,

    /// Route workload traffic through the management plane
    #[serde(default, skip_serializing_if = "is_false")]
    pub workload_proxying: bool,

    /// Periodic etcd backup configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_configuration: Option<BackupConfiguration>,
}

/// Periodic etcd backup settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfiguration {
    /// Interval between automatic backups, e.g. "1h" or "30m"
    pub interval: String,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Role a machine set plays inside its cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Machines running the Kubernetes control plane and etcd
    ControlPlane,
    /// Machines running user workloads
    Workers,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ControlPlane => write!(f, "control-plane"),
            Self::Workers => write!(f, "workers"),
        }
    }
}

/// Payload of a machine set resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetSpec {
    /// Role of the machines in this set
    pub role: Role,

    /// Machine class allocation; absent when machines are listed explicitly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_class: Option<MachineClassConfig>,

    /// Strategy applied when machines are updated in place
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<RolloutStrategy>,

    /// Strategy applied when machines are removed from the set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_strategy: Option<RolloutStrategy>,

    /// Etcd recovery source; control planes only, set once at creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_spec: Option<BootstrapSpec>,
}

/// Machine class allocation for a machine set
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineClassConfig {
    /// Name of the machine class to draw machines from
    pub name: String,

    /// How many machines to allocate
    pub size: AllocationSize,
}

/// Machine count drawn from a machine class.
///
/// In YAML this is either a positive integer or one of the sentinels
/// `unlimited`, `∞` or `infinity` (matched exactly, case sensitive).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocationSize {
    /// Fixed number of machines
    Static(u32),
    /// Every matching machine the class can provide
    Unlimited,
}

impl std::fmt::Display for AllocationSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(n) => write!(f, "{n}"),
            Self::Unlimited => write!(f, "unlimited"),
        }
    }
}

impl Serialize for AllocationSize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::Static(n) => serializer.serialize_u32(*n),
            Self::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

impl<'de> Deserialize<'de> for AllocationSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(i64),
            Word(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Count(n) if n >= 1 => u32::try_from(n)
                .map(AllocationSize::Static)
                .map_err(|_| serde::de::Error::custom("machine class size is too large")),
            Raw::Count(_) => Err(serde::de::Error::custom(
                "machine class size must be at least 1",
            )),
            Raw::Word(word) => match word.as_str() {
                "unlimited" | "\u{221e}" | "infinity" => Ok(AllocationSize::Unlimited),
                other => Err(serde::de::Error::custom(format!(
                    "invalid machine class size {other:?}: expected a positive count, \
                     \"unlimited\", \"\u{221e}\" or \"infinity\""
                ))),
            },
        }
    }
}

/// Rollout strategy for machine set scaling operations
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutStrategy {
    /// Strategy selector
    #[serde(rename = "type", default)]
    pub type_: StrategyType,

    /// Parameters for the rolling strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling: Option<RollingUpdate>,
}

impl RolloutStrategy {
    /// Validates the strategy, recording violations under the given scope
    pub fn validate(&self, scope: &str, errors: &mut ValidationErrors) {
        if let Some(rolling) = &self.rolling {
            if rolling.max_parallelism == 0 {
                errors.push(format!("{scope}: rolling maxParallelism must be at least 1"));
            }
        }
    }
}

/// Supported rollout strategy types
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum StrategyType {
    /// Replace machines a bounded number at a time
    #[default]
    Rolling,
}

/// Parameters for the rolling rollout strategy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingUpdate {
    /// Upper bound on machines changed in parallel
    #[serde(rename = "maxParallelism")]
    pub max_parallelism: u32,
}

/// Etcd recovery source for a control plane, applied once at creation.
///
/// The diff treats this field as immutable: once the machine set exists,
/// the stored value wins and template changes to it are ignored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapSpec {
    /// UUID of the cluster the snapshot was taken from
    #[serde(rename = "clusterUUID")]
    pub cluster_uuid: String,

    /// Name of the etcd backup snapshot to restore
    pub snapshot: String,
}

impl BootstrapSpec {
    /// Validates the recovery source, recording violations under the given scope
    pub fn validate(&self, scope: &str, errors: &mut ValidationErrors) {
        if self.cluster_uuid.is_empty() {
            errors.push(format!("{scope}: bootstrapSpec clusterUUID must not be empty"));
        }
        if self.snapshot.is_empty() {
            errors.push(format!("{scope}: bootstrapSpec snapshot must not be empty"));
        }
    }
}

/// Payload of a machine set node resource.
///
/// Membership is expressed entirely through metadata (ID and labels);
/// the payload itself is empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSetNodeSpec {}

/// Payload of a configuration patch resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPatchSpec {
    /// Patch content as a YAML configuration fragment
    pub data: String,
}

/// Payload of a schematic configuration resource
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchematicSpec {
    /// System extension images baked into the installation media
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system_extensions: Vec<String>,

    /// Extra kernel arguments passed to the installer
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_kernel_args: Vec<String>,
}

/// Payload of a machine link resource.
///
/// Links are created by the environment when a machine first connects to
/// the management plane; templates never produce them. The engine only
/// reads them during cascading destruction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineLinkSpec {
    /// Whether the machine currently holds a connection
    #[serde(default)]
    pub connected: bool,
}
