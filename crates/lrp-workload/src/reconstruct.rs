//! Reading an LRP back off its StatefulSet
//!
//! The inverse of translation, as far as the workload allows: identity comes
//! from labels, persisted metadata from annotations, and the envelope from
//! the application container. The raw request and registry credentials are
//! never returned.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Container, PodSpec, Probe};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use lrp_common::labels::{
    ANNOTATION_APP_ID, ANNOTATION_APP_NAME, ANNOTATION_LAST_UPDATED, ANNOTATION_ORG_GUID,
    ANNOTATION_ORG_NAME, ANNOTATION_PROCESS_GUID, ANNOTATION_REGISTERED_ROUTES,
    ANNOTATION_SPACE_GUID, ANNOTATION_SPACE_NAME, ANNOTATION_VERSION, APP_CONTAINER_NAME,
    LABEL_GUID, LABEL_VERSION,
};
use lrp_common::quantity;
use lrp_common::{
    HealthCheck, HealthCheckType, Lrp, LrpIdentifier, LrpMetadata, VolumeMount,
};

use crate::translator::CPU_WEIGHT_MULTIPLIER;

const BYTES_PER_MEGABYTE: f64 = 1_000_000.0;

/// Rebuild the LRP a StatefulSet was translated from
pub fn lrp_from_statefulset(sts: &StatefulSet) -> Lrp {
    let labels = sts.metadata.labels.clone().unwrap_or_default();
    let annotations = sts.metadata.annotations.clone().unwrap_or_default();
    let annotation = |key: &str| annotations.get(key).cloned().unwrap_or_default();

    let spec = sts.spec.as_ref();
    let pod_spec = spec.and_then(|s| s.template.spec.as_ref());
    let container = pod_spec.and_then(|p| {
        p.containers
            .iter()
            .find(|c| c.name == APP_CONTAINER_NAME)
            .or_else(|| p.containers.first())
    });

    let mut lrp = Lrp {
        identifier: LrpIdentifier::new(
            labels.get(LABEL_GUID).cloned().unwrap_or_default(),
            labels.get(LABEL_VERSION).cloned().unwrap_or_default(),
        ),
        app_name: annotation(ANNOTATION_APP_NAME),
        space_name: annotation(ANNOTATION_SPACE_NAME),
        space_guid: annotation(ANNOTATION_SPACE_GUID),
        org_name: annotation(ANNOTATION_ORG_NAME),
        org_guid: annotation(ANNOTATION_ORG_GUID),
        target_instances: spec
            .and_then(|s| s.replicas)
            .map(non_negative)
            .unwrap_or_default(),
        running_instances: sts
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .map(non_negative)
            .unwrap_or_default(),
        runs_as_root: pod_spec.is_some_and(runs_as_root),
        metadata: LrpMetadata {
            process_guid: annotation(ANNOTATION_PROCESS_GUID),
            last_updated: annotation(ANNOTATION_LAST_UPDATED),
            app_uris: annotation(ANNOTATION_REGISTERED_ROUTES),
            app_id: annotation(ANNOTATION_APP_ID),
            version: annotation(ANNOTATION_VERSION),
            app_name: annotation(ANNOTATION_APP_NAME),
        },
        ..Default::default()
    };

    if let Some(container) = container {
        fill_from_container(&mut lrp, container, pod_spec);
    }
    lrp
}

fn fill_from_container(lrp: &mut Lrp, container: &Container, pod_spec: Option<&PodSpec>) {
    lrp.image = container.image.clone().unwrap_or_default();
    lrp.command = container.command.clone().unwrap_or_default();
    lrp.ports = container
        .ports
        .iter()
        .flatten()
        .map(|p| p.container_port)
        .collect();

    // Runtime-sourced variables are injected by translation, not declared
    lrp.env = container
        .env
        .iter()
        .flatten()
        .filter(|e| e.value_from.is_none())
        .map(|e| (e.name.clone(), e.value.clone().unwrap_or_default()))
        .collect::<BTreeMap<_, _>>();

    if let Some(resources) = &container.resources {
        let limits = resources.limits.clone().unwrap_or_default();
        let requests = resources.requests.clone().unwrap_or_default();

        lrp.memory_mb = limits
            .get("memory")
            .and_then(quantity::value)
            .map(|bytes| (bytes / BYTES_PER_MEGABYTE).round() as u64)
            .unwrap_or_default();
        lrp.disk_mb = limits
            .get("ephemeral-storage")
            .and_then(quantity::value)
            .map(|bytes| (bytes / BYTES_PER_MEGABYTE).round() as u64)
            .unwrap_or_default();
        lrp.cpu_weight = requests
            .get("cpu")
            .and_then(quantity::milli_value)
            .map(|milli| (milli / CPU_WEIGHT_MULTIPLIER as f64).round() as u32)
            .unwrap_or_default();
    }

    if let Some(probe) = &container.liveness_probe {
        lrp.health = health_from_probe(probe);
    } else {
        lrp.health.type_ = HealthCheckType::None;
    }

    let claims: BTreeMap<&str, &str> = pod_spec
        .and_then(|p| p.volumes.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|v| {
            v.persistent_volume_claim
                .as_ref()
                .map(|c| (v.name.as_str(), c.claim_name.as_str()))
        })
        .collect();
    lrp.volume_mounts = container
        .volume_mounts
        .iter()
        .flatten()
        .filter_map(|m| {
            claims.get(m.name.as_str()).map(|claim| VolumeMount {
                claim_name: claim.to_string(),
                mount_path: m.mount_path.clone(),
            })
        })
        .collect();
}

fn health_from_probe(probe: &Probe) -> HealthCheck {
    let timeout_ms = probe
        .initial_delay_seconds
        .map(|s| u32::try_from(s).unwrap_or_default().saturating_mul(1000))
        .unwrap_or_default();

    if let Some(http) = &probe.http_get {
        HealthCheck {
            type_: HealthCheckType::Http,
            port: port_number(&http.port),
            endpoint: http.path.clone().unwrap_or_default(),
            timeout_ms,
        }
    } else if let Some(tcp) = &probe.tcp_socket {
        HealthCheck {
            type_: HealthCheckType::Port,
            port: port_number(&tcp.port),
            endpoint: String::new(),
            timeout_ms,
        }
    } else {
        HealthCheck {
            type_: HealthCheckType::None,
            ..Default::default()
        }
    }
}

fn port_number(port: &IntOrString) -> i32 {
    match port {
        IntOrString::Int(p) => *p,
        IntOrString::String(s) => s.parse().unwrap_or_default(),
    }
}

fn runs_as_root(pod_spec: &PodSpec) -> bool {
    pod_spec
        .security_context
        .as_ref()
        .and_then(|s| s.run_as_user)
        == Some(0)
}

fn non_negative(n: i32) -> u32 {
    u32::try_from(n).unwrap_or_default()
}
