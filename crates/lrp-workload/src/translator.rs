//! LRP to Kubernetes translation
//!
//! [`StatefulSetTranslator::translate`] is pure and total: it turns one LRP
//! into the full object set the desirer submits, and never talks to the
//! cluster. Probe construction is delegated to injected [`ProbeCreator`]s.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, EnvVar, EnvVarSource, LocalObjectReference,
    ObjectFieldSelector, PersistentVolumeClaimVolumeSource, PodAffinityTerm, PodAntiAffinity,
    PodSecurityContext, PodSpec, PodTemplateSpec, ResourceRequirements, SeccompProfile, Secret,
    SecurityContext, Volume, VolumeMount, WeightedPodAffinityTerm,
};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use k8s_openapi::ByteString;
use serde_json::json;

use lrp_common::labels::{
    registry_secret_name, ANNOTATION_APP_ID, ANNOTATION_APP_NAME, ANNOTATION_LAST_UPDATED,
    ANNOTATION_ORG_GUID, ANNOTATION_ORG_NAME, ANNOTATION_ORIGINAL_REQUEST,
    ANNOTATION_PROCESS_GUID, ANNOTATION_REGISTERED_ROUTES, ANNOTATION_SPACE_GUID,
    ANNOTATION_SPACE_NAME, ANNOTATION_VERSION, APP_CONTAINER_NAME, ENV_INSTANCE_INTERNAL_IP,
    ENV_INSTANCE_IP, ENV_POD_NAME, LABEL_GUID, LABEL_ROOTFS_VERSION, LABEL_SOURCE_TYPE,
    LABEL_VERSION, SOURCE_TYPE_APP,
};
use lrp_common::quantity::{megabytes, millicores};
use lrp_common::{Lrp, OperatorConfig, PrivateRegistry};

use crate::disruption_budget;
use crate::probes::ProbeCreator;

/// Millicpu requested per unit of CPU weight
pub const CPU_WEIGHT_MULTIPLIER: u64 = 10;

/// Pull policy; tags are mutable, so a cached image is never trusted
pub const IMAGE_PULL_POLICY_ALWAYS: &str = "Always";

/// Instances start and stop independently of each other
pub const POD_MANAGEMENT_POLICY_PARALLEL: &str = "Parallel";

/// Secret type for docker registry credentials
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";

/// Data key holding the docker config in a registry secret
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

const RESOURCE_MEMORY: &str = "memory";
const RESOURCE_CPU: &str = "cpu";
const RESOURCE_EPHEMERAL_STORAGE: &str = "ephemeral-storage";

const FIELD_POD_NAME: &str = "metadata.name";
const FIELD_POD_IP: &str = "status.podIP";

const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";
const ANTI_AFFINITY_WEIGHT: i32 = 100;

/// Deployment-wide settings applied to every translated workload
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TranslatorConfig {
    /// Pull secret referenced by every pod, before any per-LRP secret
    pub registry_secret_name: Option<String>,
    /// Value for the `rootfs-version` label
    pub rootfs_version: Option<String>,
    /// Service account pods run as
    pub application_service_account: Option<String>,
    /// Mount the service-account token into application pods
    pub allow_automount_service_account_token: bool,
}

impl From<&OperatorConfig> for TranslatorConfig {
    fn from(config: &OperatorConfig) -> Self {
        Self {
            registry_secret_name: config.registry_secret_name.clone(),
            rootfs_version: config.rootfs_version.clone(),
            application_service_account: config.application_service_account.clone(),
            allow_automount_service_account_token: config
                .unsafe_allow_automount_service_account_token,
        }
    }
}

/// The Kubernetes objects one LRP maps onto
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceGraph {
    /// The replica group
    pub statefulset: StatefulSet,
    /// Pull credentials, when the LRP uses a private registry
    pub registry_secret: Option<Secret>,
    /// Disruption budget, when the LRP runs more than one instance
    pub disruption_budget: Option<PodDisruptionBudget>,
}

/// Translates LRPs into StatefulSet-based resource graphs
#[derive(Clone)]
pub struct StatefulSetTranslator {
    config: TranslatorConfig,
    liveness: Arc<dyn ProbeCreator>,
    readiness: Arc<dyn ProbeCreator>,
}

impl StatefulSetTranslator {
    /// Create a translator with the given probe creators
    pub fn new(
        config: TranslatorConfig,
        liveness: Arc<dyn ProbeCreator>,
        readiness: Arc<dyn ProbeCreator>,
    ) -> Self {
        Self {
            config,
            liveness,
            readiness,
        }
    }

    /// Build the resource graph for `lrp` under the workload name `name`
    pub fn translate(&self, name: &str, lrp: &Lrp) -> ResourceGraph {
        let registry_secret = lrp
            .private_registry
            .as_ref()
            .map(|registry| build_registry_secret(&registry_secret_name(name), registry));

        let disruption_budget = disruption_budget::should_exist(lrp.target_instances)
            .then(|| disruption_budget::build(name, lrp.id()));

        ResourceGraph {
            statefulset: self.build_statefulset(name, lrp),
            registry_secret,
            disruption_budget,
        }
    }

    fn build_statefulset(&self, name: &str, lrp: &Lrp) -> StatefulSet {
        let labels = self.labels(lrp);
        let selector = LabelSelector {
            match_labels: Some(selector_labels(lrp)),
            ..Default::default()
        };

        let pod_annotations = BTreeMap::from([
            (
                ANNOTATION_PROCESS_GUID.to_string(),
                lrp.metadata.process_guid.clone(),
            ),
            (ANNOTATION_APP_ID.to_string(), lrp.metadata.app_id.clone()),
        ]);

        StatefulSet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.clone()),
                annotations: Some(workload_annotations(lrp)),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                replicas: Some(replica_count(lrp.target_instances)),
                pod_management_policy: Some(POD_MANAGEMENT_POLICY_PARALLEL.to_string()),
                selector,
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        annotations: Some(pod_annotations),
                        ..Default::default()
                    }),
                    spec: Some(self.build_pod_spec(name, lrp)),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn build_pod_spec(&self, name: &str, lrp: &Lrp) -> PodSpec {
        let mut image_pull_secrets = Vec::new();
        if let Some(secret) = &self.config.registry_secret_name {
            image_pull_secrets.push(LocalObjectReference {
                name: secret.clone(),
            });
        }
        if lrp.private_registry.is_some() {
            image_pull_secrets.push(LocalObjectReference {
                name: registry_secret_name(name),
            });
        }

        let volumes: Vec<Volume> = lrp
            .volume_mounts
            .iter()
            .map(|mount| Volume {
                name: mount.claim_name.clone(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: mount.claim_name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect();

        let security_context = lrp.runs_as_root.then(|| PodSecurityContext {
            run_as_user: Some(0),
            run_as_non_root: Some(false),
            ..Default::default()
        });

        PodSpec {
            containers: vec![self.build_container(lrp)],
            volumes: (!volumes.is_empty()).then_some(volumes),
            image_pull_secrets: (!image_pull_secrets.is_empty()).then_some(image_pull_secrets),
            automount_service_account_token: Some(
                self.config.allow_automount_service_account_token,
            ),
            service_account_name: self.config.application_service_account.clone(),
            security_context,
            affinity: Some(spread_across_hosts(lrp)),
            ..Default::default()
        }
    }

    fn build_container(&self, lrp: &Lrp) -> Container {
        let mut env: Vec<EnvVar> = lrp
            .env
            .iter()
            .map(|(name, value)| EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                ..Default::default()
            })
            .collect();
        env.extend([
            field_env(ENV_POD_NAME, FIELD_POD_NAME),
            field_env(ENV_INSTANCE_IP, FIELD_POD_IP),
            field_env(ENV_INSTANCE_INTERNAL_IP, FIELD_POD_IP),
        ]);

        let ports: Vec<ContainerPort> = lrp
            .ports
            .iter()
            .map(|port| ContainerPort {
                container_port: *port,
                ..Default::default()
            })
            .collect();

        let volume_mounts: Vec<VolumeMount> = lrp
            .volume_mounts
            .iter()
            .map(|mount| VolumeMount {
                name: mount.claim_name.clone(),
                mount_path: mount.mount_path.clone(),
                ..Default::default()
            })
            .collect();

        Container {
            name: APP_CONTAINER_NAME.to_string(),
            image: Some(lrp.image.clone()),
            image_pull_policy: Some(IMAGE_PULL_POLICY_ALWAYS.to_string()),
            command: (!lrp.command.is_empty()).then(|| lrp.command.clone()),
            env: Some(env),
            ports: (!ports.is_empty()).then_some(ports),
            resources: Some(resources(lrp)),
            liveness_probe: self.liveness.create(lrp),
            readiness_probe: self.readiness.create(lrp),
            volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
            security_context: Some(SecurityContext {
                allow_privilege_escalation: Some(false),
                seccomp_profile: Some(SeccompProfile {
                    type_: "RuntimeDefault".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn labels(&self, lrp: &Lrp) -> BTreeMap<String, String> {
        let mut labels = selector_labels(lrp);
        if let Some(rootfs) = &self.config.rootfs_version {
            labels.insert(LABEL_ROOTFS_VERSION.to_string(), rootfs.clone());
        }
        labels
    }
}

/// Build the `kubernetes.io/dockerconfigjson` secret for a private registry
pub fn build_registry_secret(secret_name: &str, registry: &PrivateRegistry) -> Secret {
    let auth = STANDARD.encode(format!("{}:{}", registry.username, registry.password));
    let config = json!({
        "auths": {
            registry.server.as_str(): {
                "username": registry.username,
                "password": registry.password,
                "auth": auth,
            }
        }
    });

    Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.to_string()),
            ..Default::default()
        },
        type_: Some(DOCKER_CONFIG_JSON_TYPE.to_string()),
        data: Some(BTreeMap::from([(
            DOCKER_CONFIG_JSON_KEY.to_string(),
            ByteString(config.to_string().into_bytes()),
        )])),
        ..Default::default()
    }
}

fn selector_labels(lrp: &Lrp) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_GUID.to_string(), lrp.id().guid.clone()),
        (LABEL_VERSION.to_string(), lrp.id().version.clone()),
        (LABEL_SOURCE_TYPE.to_string(), SOURCE_TYPE_APP.to_string()),
    ])
}

fn workload_annotations(lrp: &Lrp) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            ANNOTATION_ORIGINAL_REQUEST.to_string(),
            lrp.raw_request.clone(),
        ),
        (
            ANNOTATION_PROCESS_GUID.to_string(),
            lrp.metadata.process_guid.clone(),
        ),
        (ANNOTATION_APP_ID.to_string(), lrp.metadata.app_id.clone()),
        (ANNOTATION_APP_NAME.to_string(), lrp.app_name.clone()),
        (ANNOTATION_VERSION.to_string(), lrp.metadata.version.clone()),
        (ANNOTATION_SPACE_NAME.to_string(), lrp.space_name.clone()),
        (ANNOTATION_SPACE_GUID.to_string(), lrp.space_guid.clone()),
        (ANNOTATION_ORG_NAME.to_string(), lrp.org_name.clone()),
        (ANNOTATION_ORG_GUID.to_string(), lrp.org_guid.clone()),
        (
            ANNOTATION_REGISTERED_ROUTES.to_string(),
            lrp.metadata.app_uris.clone(),
        ),
        (
            ANNOTATION_LAST_UPDATED.to_string(),
            lrp.metadata.last_updated.clone(),
        ),
    ])
}

fn resources(lrp: &Lrp) -> ResourceRequirements {
    let memory = megabytes(lrp.memory_mb);
    let cpu = millicores(u64::from(lrp.cpu_weight) * CPU_WEIGHT_MULTIPLIER);

    ResourceRequirements {
        limits: Some(BTreeMap::from([
            (RESOURCE_MEMORY.to_string(), memory.clone()),
            (
                RESOURCE_EPHEMERAL_STORAGE.to_string(),
                megabytes(lrp.disk_mb),
            ),
        ])),
        requests: Some(BTreeMap::<String, Quantity>::from([
            (RESOURCE_MEMORY.to_string(), memory),
            (RESOURCE_CPU.to_string(), cpu),
        ])),
        ..Default::default()
    }
}

fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn spread_across_hosts(lrp: &Lrp) -> Affinity {
    let requirement = |key: &str, value: &str| LabelSelectorRequirement {
        key: key.to_string(),
        operator: "In".to_string(),
        values: Some(vec![value.to_string()]),
    };

    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: ANTI_AFFINITY_WEIGHT,
                    pod_affinity_term: PodAffinityTerm {
                        topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
                        label_selector: Some(LabelSelector {
                            match_expressions: Some(vec![
                                requirement(LABEL_GUID, &lrp.id().guid),
                                requirement(LABEL_VERSION, &lrp.id().version),
                            ]),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn replica_count(target_instances: u32) -> i32 {
    i32::try_from(target_instances).unwrap_or(i32::MAX)
}
