//! Instance status
//!
//! Instances are read fresh from the cluster on every call. A pod that is
//! being torn down, signalled by a `Killing` event or a deletion timestamp,
//! is not an instance.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Event, Pod};
use tracing::{debug, warn};

use lrp_common::labels::pod_ordinal;
use lrp_common::{Error, Instance, InstanceState, LrpIdentifier, Result};

use crate::clients::{EventClient, PodClient};

/// Event reason the kubelet records when it stops a container
pub const EVENT_REASON_KILLING: &str = "Killing";

/// Derives instance facts from pods and their events
#[derive(Clone)]
pub struct InstanceStatusAggregator {
    pods: Arc<dyn PodClient>,
    events: Arc<dyn EventClient>,
}

impl InstanceStatusAggregator {
    /// Create an aggregator over the given clients
    pub fn new(pods: Arc<dyn PodClient>, events: Arc<dyn EventClient>) -> Self {
        Self { pods, events }
    }

    /// Instances of the LRP, ordered by index
    pub async fn get_instances(&self, id: &LrpIdentifier) -> Result<Vec<Instance>> {
        let pods = self
            .pods
            .list(&id.label_selector())
            .await
            .map_err(|e| Error::remote("failed to list pods", e))?;

        let mut instances = Vec::with_capacity(pods.len());
        for pod in &pods {
            let name = pod.metadata.name.as_deref().unwrap_or_default();
            let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();

            let events = self
                .events
                .list_for_pod(namespace, name)
                .await
                .map_err(|e| Error::remote(format!("failed to get events for pod {}", name), e))?;

            if is_terminating(pod, &events) {
                debug!(pod = %name, "pod is being stopped, not reporting it");
                continue;
            }

            let Some(index) = pod_ordinal(name) else {
                warn!(pod = %name, "pod name has no ordinal, not reporting it");
                continue;
            };

            instances.push(Instance {
                index,
                since: started_at_nanos(pod),
                state: InstanceState::Running,
            });
        }

        instances.sort_by_key(|instance| instance.index);
        Ok(instances)
    }
}

fn is_terminating(pod: &Pod, events: &[Event]) -> bool {
    pod.metadata.deletion_timestamp.is_some()
        || events
            .iter()
            .any(|e| e.reason.as_deref() == Some(EVENT_REASON_KILLING))
}

fn started_at_nanos(pod: &Pod) -> i64 {
    pod.status
        .as_ref()
        .and_then(|s| s.start_time.as_ref())
        .and_then(|t| t.0.timestamp_nanos_opt())
        .unwrap_or_default()
}
