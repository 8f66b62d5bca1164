//! Per-instance resource metrics
//!
//! Usage samples from the metrics API are joined to pods by name; the pod
//! supplies identity and quota, the sample supplies usage. Samples that
//! cannot be attributed to an indexed LRP instance are skipped, not erred.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[cfg(test)]
use mockall::automock;

use lrp_common::labels::{pod_ordinal, LABEL_GUID, LABEL_SOURCE_TYPE, SOURCE_TYPE_APP};
use lrp_common::quantity;
use lrp_common::{Error, Result};

use crate::clients::{PodClient, PodMetricsClient};

/// Millicpu per reported CPU unit; 1000m of usage reports as 100
const MILLICPU_PER_CPU_UNIT: f64 = 10.0;

/// Usage sample for one pod, as served by `metrics.k8s.io`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodMetrics {
    /// Pod identity; the name matches the sampled pod
    pub metadata: ObjectMeta,
    /// Sample time
    pub timestamp: Option<String>,
    /// Sampling window
    pub window: Option<String>,
    /// Per-container usage
    pub containers: Vec<ContainerMetrics>,
}

/// Usage of one container
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerMetrics {
    /// Container name
    pub name: String,
    /// Resource name to quantity (`cpu`, `memory`)
    pub usage: BTreeMap<String, Quantity>,
}

/// Resource usage of one LRP instance
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricMessage {
    /// Owning LRP's GUID
    pub app_id: String,
    /// Instance ordinal, as a string
    pub index_id: String,
    /// CPU usage, 100 per fully used core
    pub cpu: f64,
    /// Memory usage in bytes
    pub memory: f64,
    /// Memory limit in bytes
    pub memory_quota: f64,
    /// Disk usage in bytes; the metrics API does not report it
    pub disk: f64,
    /// Ephemeral storage limit in bytes
    pub disk_quota: f64,
}

/// Source of metric batches
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MetricsCollector: Send + Sync {
    /// Collect one batch
    async fn collect(&self) -> Result<Vec<MetricMessage>>;
}

/// Collects by joining pod metrics with LRP pods
pub struct PodMetricsCollector {
    metrics: Arc<dyn PodMetricsClient>,
    pods: Arc<dyn PodClient>,
}

impl PodMetricsCollector {
    /// Create a collector over the given clients
    pub fn new(metrics: Arc<dyn PodMetricsClient>, pods: Arc<dyn PodClient>) -> Self {
        Self { metrics, pods }
    }
}

#[async_trait]
impl MetricsCollector for PodMetricsCollector {
    async fn collect(&self) -> Result<Vec<MetricMessage>> {
        let samples = self
            .metrics
            .list()
            .await
            .map_err(|e| Error::remote("failed to list metrics", e))?;

        let selector = format!("{}={}", LABEL_SOURCE_TYPE, SOURCE_TYPE_APP);
        let pods = self
            .pods
            .list(&selector)
            .await
            .map_err(|e| Error::remote("failed to list pods", e))?;

        Ok(join(&samples, &pods))
    }
}

fn join(samples: &[PodMetrics], pods: &[Pod]) -> Vec<MetricMessage> {
    let pods_by_name: HashMap<&str, &Pod> = pods
        .iter()
        .filter_map(|pod| pod.metadata.name.as_deref().map(|name| (name, pod)))
        .collect();

    samples
        .iter()
        .filter_map(|sample| {
            let name = sample.metadata.name.as_deref()?;
            if sample.containers.is_empty() {
                debug!(pod = %name, "metrics sample has no containers, skipping");
                return None;
            }
            let Some(pod) = pods_by_name.get(name) else {
                debug!(pod = %name, "no LRP pod for metrics sample, skipping");
                return None;
            };
            let Some(index) = pod_ordinal(name) else {
                debug!(pod = %name, "pod name has no ordinal, skipping metrics");
                return None;
            };
            Some(message_for(pod, sample, index))
        })
        .collect()
}

fn message_for(pod: &Pod, sample: &PodMetrics, index: u32) -> MetricMessage {
    let sum = |resource: &str, scale: fn(&Quantity) -> Option<f64>| -> f64 {
        sample
            .containers
            .iter()
            .filter_map(|c| c.usage.get(resource).and_then(scale))
            .sum()
    };

    let limits = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
        .and_then(|c| c.resources.as_ref())
        .and_then(|r| r.limits.as_ref());
    let limit = |resource: &str| -> f64 {
        limits
            .and_then(|l| l.get(resource))
            .and_then(quantity::value)
            .unwrap_or_default()
    };

    MetricMessage {
        app_id: pod
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(LABEL_GUID))
            .cloned()
            .unwrap_or_default(),
        index_id: index.to_string(),
        cpu: sum("cpu", quantity::milli_value) / MILLICPU_PER_CPU_UNIT,
        memory: sum("memory", quantity::value),
        memory_quota: limit("memory"),
        disk: 0.0,
        disk_quota: limit("ephemeral-storage"),
    }
}

/// Collect once and hand the batch to `channel`.
///
/// A collection error is returned as is and nothing is sent. A full channel
/// drops the batch so the caller's timer never blocks; a closed channel is
/// [`Error::ChannelClosed`]. The channel is never closed here.
pub async fn forward_metrics_to_channel(
    collector: &dyn MetricsCollector,
    channel: &Sender<Vec<MetricMessage>>,
) -> Result<()> {
    let batch = collector.collect().await?;
    let size = batch.len();

    match channel.try_send(batch) {
        Ok(()) => {
            debug!(messages = size, "forwarded metrics batch");
            Ok(())
        }
        Err(TrySendError::Full(_)) => {
            warn!(messages = size, "metrics channel full, dropping batch");
            Ok(())
        }
        Err(TrySendError::Closed(_)) => Err(Error::ChannelClosed),
    }
}

/// Forward a batch every `interval` until cancelled or the channel closes.
///
/// Collection failures are logged and the loop carries on with the next tick.
pub async fn run_metrics_loop(
    collector: Arc<dyn MetricsCollector>,
    channel: Sender<Vec<MetricMessage>>,
    interval: std::time::Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("metrics loop cancelled");
                return Ok(());
            }
            _ = ticker.tick() => {
                match forward_metrics_to_channel(collector.as_ref(), &channel).await {
                    Ok(()) => {}
                    Err(Error::ChannelClosed) => return Err(Error::ChannelClosed),
                    Err(e) => error!(error = %e, "failed to collect metrics"),
                }
            }
        }
    }
}
