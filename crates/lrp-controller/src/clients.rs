//! Typed cluster clients
//!
//! Each trait covers one resource kind and returns raw [`kube::Error`]s; the
//! caller decides what a 404 or 409 means and adds the operation prefix.
//! List calls are scoped by the client itself (one namespace, or the whole
//! cluster), mutations always name their namespace.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Event, Pod, Secret};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::Client;

#[cfg(test)]
use mockall::automock;

use crate::metrics::PodMetrics;

/// Group of the resource-metrics API
const METRICS_GROUP: &str = "metrics.k8s.io";
/// Served version of the resource-metrics API
const METRICS_VERSION: &str = "v1beta1";

/// StatefulSet operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatefulSetClient: Send + Sync {
    /// Create a StatefulSet
    async fn create(&self, namespace: &str, sts: &StatefulSet)
        -> Result<StatefulSet, kube::Error>;

    /// Fetch a StatefulSet by name
    async fn get(&self, namespace: &str, name: &str) -> Result<StatefulSet, kube::Error>;

    /// Replace a StatefulSet; fails with 409 when `sts` carries a stale resource version
    async fn replace(
        &self,
        namespace: &str,
        sts: &StatefulSet,
    ) -> Result<StatefulSet, kube::Error>;

    /// List StatefulSets matching a label selector, empty for all
    async fn list(&self, selector: &str) -> Result<Vec<StatefulSet>, kube::Error>;

    /// Delete a StatefulSet and, in the background, its pods
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;
}

/// Pod operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodClient: Send + Sync {
    /// List pods matching a label selector
    async fn list(&self, selector: &str) -> Result<Vec<Pod>, kube::Error>;

    /// Delete a pod by name
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;
}

/// Registry credential secret operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretClient: Send + Sync {
    /// Create a secret
    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, kube::Error>;

    /// Delete a secret by name
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;
}

/// PodDisruptionBudget operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodDisruptionBudgetClient: Send + Sync {
    /// Create a budget
    async fn create(
        &self,
        namespace: &str,
        pdb: &PodDisruptionBudget,
    ) -> Result<PodDisruptionBudget, kube::Error>;

    /// Fetch a budget by name, `None` when absent
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodDisruptionBudget>, kube::Error>;

    /// Delete a budget by name
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;
}

/// Event queries
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventClient: Send + Sync {
    /// Events whose involved object is the given pod
    async fn list_for_pod(&self, namespace: &str, pod_name: &str)
        -> Result<Vec<Event>, kube::Error>;
}

/// Resource-usage samples from the metrics API
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodMetricsClient: Send + Sync {
    /// All pod usage samples in scope
    async fn list(&self) -> Result<Vec<PodMetrics>, kube::Error>;
}

/// kube-rs backed implementation of every client trait
#[derive(Clone)]
pub struct KubeClients {
    client: Client,
    list_scope: Option<String>,
}

impl KubeClients {
    /// Create clients that list within `list_scope`, or cluster-wide for `None`
    pub fn new(client: Client, list_scope: Option<String>) -> Self {
        Self { client, list_scope }
    }

    fn scoped<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match &self.list_scope {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn metrics_api(&self) -> Api<DynamicObject> {
        let ar = ApiResource {
            group: METRICS_GROUP.to_string(),
            version: METRICS_VERSION.to_string(),
            api_version: format!("{}/{}", METRICS_GROUP, METRICS_VERSION),
            kind: "PodMetrics".to_string(),
            plural: "pods".to_string(),
        };
        match &self.list_scope {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn selector_params(selector: &str) -> ListParams {
    if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(selector)
    }
}

#[async_trait]
impl StatefulSetClient for KubeClients {
    async fn create(
        &self,
        namespace: &str,
        sts: &StatefulSet,
    ) -> Result<StatefulSet, kube::Error> {
        self.namespaced::<StatefulSet>(namespace)
            .create(&PostParams::default(), sts)
            .await
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<StatefulSet, kube::Error> {
        self.namespaced::<StatefulSet>(namespace).get(name).await
    }

    async fn replace(
        &self,
        namespace: &str,
        sts: &StatefulSet,
    ) -> Result<StatefulSet, kube::Error> {
        let name = sts.metadata.name.clone().unwrap_or_default();
        self.namespaced::<StatefulSet>(namespace)
            .replace(&name, &PostParams::default(), sts)
            .await
    }

    async fn list(&self, selector: &str) -> Result<Vec<StatefulSet>, kube::Error> {
        let list = self
            .scoped::<StatefulSet>()
            .list(&selector_params(selector))
            .await?;
        Ok(list.items)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        self.namespaced::<StatefulSet>(namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PodClient for KubeClients {
    async fn list(&self, selector: &str) -> Result<Vec<Pod>, kube::Error> {
        let list = self.scoped::<Pod>().list(&selector_params(selector)).await?;
        Ok(list.items)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        self.namespaced::<Pod>(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SecretClient for KubeClients {
    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, kube::Error> {
        self.namespaced::<Secret>(namespace)
            .create(&PostParams::default(), secret)
            .await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        self.namespaced::<Secret>(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PodDisruptionBudgetClient for KubeClients {
    async fn create(
        &self,
        namespace: &str,
        pdb: &PodDisruptionBudget,
    ) -> Result<PodDisruptionBudget, kube::Error> {
        self.namespaced::<PodDisruptionBudget>(namespace)
            .create(&PostParams::default(), pdb)
            .await
    }

    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodDisruptionBudget>, kube::Error> {
        self.namespaced::<PodDisruptionBudget>(namespace)
            .get_opt(name)
            .await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        self.namespaced::<PodDisruptionBudget>(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventClient for KubeClients {
    async fn list_for_pod(
        &self,
        namespace: &str,
        pod_name: &str,
    ) -> Result<Vec<Event>, kube::Error> {
        let fields = format!(
            "involvedObject.namespace={},involvedObject.name={},involvedObject.kind=Pod",
            namespace, pod_name
        );
        let list = self
            .namespaced::<Event>(namespace)
            .list(&ListParams::default().fields(&fields))
            .await?;
        Ok(list.items)
    }
}

#[async_trait]
impl PodMetricsClient for KubeClients {
    async fn list(&self) -> Result<Vec<PodMetrics>, kube::Error> {
        let list = self.metrics_api().list(&ListParams::default()).await?;
        list.items
            .into_iter()
            .map(|obj| {
                serde_json::to_value(obj)
                    .and_then(serde_json::from_value)
                    .map_err(kube::Error::SerdeError)
            })
            .collect()
    }
}
