//! Liveness and readiness probe construction
//!
//! The translator only knows the [`ProbeCreator`] capability; which probe a
//! health-check kind turns into is decided here.

use k8s_openapi::api::core::v1::{HTTPGetAction, Probe, TCPSocketAction};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use lrp_common::{HealthCheck, HealthCheckType, Lrp};

/// Consecutive failures before the kubelet restarts the container
const LIVENESS_FAILURE_THRESHOLD: i32 = 4;

/// A single failure marks the instance unready
const READINESS_FAILURE_THRESHOLD: i32 = 1;

/// Capability building a probe for an LRP's health check
#[cfg_attr(test, mockall::automock)]
pub trait ProbeCreator: Send + Sync {
    /// Probe for `lrp`, or `None` when its health check asks for none
    fn create(&self, lrp: &Lrp) -> Option<Probe>;
}

/// Builds liveness probes
#[derive(Clone, Copy, Debug, Default)]
pub struct LivenessProbeCreator;

impl ProbeCreator for LivenessProbeCreator {
    fn create(&self, lrp: &Lrp) -> Option<Probe> {
        build_probe(&lrp.health, LIVENESS_FAILURE_THRESHOLD)
    }
}

/// Builds readiness probes
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadinessProbeCreator;

impl ProbeCreator for ReadinessProbeCreator {
    fn create(&self, lrp: &Lrp) -> Option<Probe> {
        build_probe(&lrp.health, READINESS_FAILURE_THRESHOLD)
    }
}

fn build_probe(health: &HealthCheck, failure_threshold: i32) -> Option<Probe> {
    let initial_delay = i32::try_from(health.timeout_ms / 1000).unwrap_or(i32::MAX);
    let port = IntOrString::Int(health.port);

    let probe = match health.type_ {
        HealthCheckType::Http => Probe {
            http_get: Some(HTTPGetAction {
                path: Some(health.endpoint.clone()),
                port,
                ..Default::default()
            }),
            ..Default::default()
        },
        HealthCheckType::Port => Probe {
            tcp_socket: Some(TCPSocketAction {
                port,
                ..Default::default()
            }),
            ..Default::default()
        },
        HealthCheckType::None => return None,
    };

    Some(Probe {
        initial_delay_seconds: Some(initial_delay),
        failure_threshold: Some(failure_threshold),
        ..probe
    })
}
