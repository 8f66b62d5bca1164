//! Disruption-budget policy
//!
//! A multi-instance LRP gets a PodDisruptionBudget so node drains evict at
//! most one instance at a time. Single-instance and scaled-to-zero LRPs get
//! none; the budget is deleted rather than relaxed so its absence can be
//! observed.

use std::collections::BTreeMap;

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use lrp_common::labels::{LABEL_GUID, LABEL_VERSION};
use lrp_common::LrpIdentifier;

/// Instances that must stay available during voluntary disruption
pub const MIN_AVAILABLE: i32 = 1;

/// Whether an LRP with `target_instances` should have a disruption budget
pub fn should_exist(target_instances: u32) -> bool {
    target_instances > 1
}

/// Build the budget for a workload, selecting its pods by identity labels.
///
/// The budget shares the workload's name.
pub fn build(workload_name: &str, id: &LrpIdentifier) -> PodDisruptionBudget {
    let labels = BTreeMap::from([
        (LABEL_GUID.to_string(), id.guid.clone()),
        (LABEL_VERSION.to_string(), id.version.clone()),
    ]);

    PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(workload_name.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            min_available: Some(IntOrString::Int(MIN_AVAILABLE)),
            selector: Some(LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
