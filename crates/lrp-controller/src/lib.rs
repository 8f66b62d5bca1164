//! LRP reconciliation against a Kubernetes cluster
//!
//! - [`desirer`]: desire, update, read and stop LRPs as StatefulSets
//! - [`status`]: instance status derived from pods and their events
//! - [`metrics`]: per-instance usage joined from the metrics API
//! - [`clients`]: the cluster calls all of the above go through

#![deny(missing_docs)]

pub mod clients;
pub mod desirer;
pub mod metrics;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use clients::KubeClients;
pub use desirer::{Desirer, DesirerClients, StatefulSetDesirer};
pub use metrics::{
    forward_metrics_to_channel, run_metrics_loop, MetricMessage, MetricsCollector,
    PodMetricsCollector,
};
pub use status::InstanceStatusAggregator;
