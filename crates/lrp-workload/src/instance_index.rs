//! Instance-index injection
//!
//! StatefulSet pods cannot learn their ordinal from the downward API, so an
//! admission hook stamps it as an environment variable. This is the rule it
//! applies; serving the webhook is someone else's job.

use k8s_openapi::api::core::v1::{EnvVar, Pod};
use tracing::debug;

use lrp_common::labels::{
    pod_ordinal, APP_CONTAINER_NAME, ENV_INSTANCE_INDEX, LABEL_SOURCE_TYPE, SOURCE_TYPE_APP,
};

/// Add the instance index to the application container of an LRP pod.
///
/// Returns `true` when the pod was changed. Pods not labelled as LRP
/// instances, and pods whose name carries no ordinal, are left alone.
pub fn inject_instance_index(pod: &mut Pod) -> bool {
    let is_app = pod
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(LABEL_SOURCE_TYPE))
        .is_some_and(|value| value == SOURCE_TYPE_APP);
    if !is_app {
        return false;
    }

    let Some(name) = pod.metadata.name.as_deref() else {
        return false;
    };
    let Some(index) = pod_ordinal(name) else {
        debug!(pod = %name, "pod name has no ordinal, not injecting instance index");
        return false;
    };

    let Some(spec) = pod.spec.as_mut() else {
        return false;
    };
    let Some(container) = spec
        .containers
        .iter_mut()
        .find(|c| c.name == APP_CONTAINER_NAME)
    else {
        return false;
    };

    container.env.get_or_insert_with(Vec::new).push(EnvVar {
        name: ENV_INSTANCE_INDEX.to_string(),
        value: Some(index.to_string()),
        ..Default::default()
    });
    true
}
