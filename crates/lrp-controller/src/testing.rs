//! In-memory cluster for tests
//!
//! Implements every client trait over shared maps. Creating a StatefulSet
//! materialises its ordinal pods and replacing it rescales them; deleting it
//! cascades to its pods. Writes bump a resource version so stale replaces
//! conflict the way the API server's would.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{
    Container, Event, ObjectReference, Pod, PodSpec, PodStatus, ResourceRequirements, Secret,
};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::error::ErrorResponse;
use parking_lot::Mutex;

use lrp_common::labels::{
    pod_name, LABEL_GUID, LABEL_SOURCE_TYPE, LABEL_VERSION, SOURCE_TYPE_APP,
};

use crate::clients::{
    EventClient, PodClient, PodDisruptionBudgetClient, PodMetricsClient, SecretClient,
    StatefulSetClient,
};
use crate::metrics::PodMetrics;

type Key = (String, String);

/// Build an API error the way kube-rs surfaces one
pub fn api_error(code: u16, message: &str) -> kube::Error {
    let reason = match code {
        404 => "NotFound",
        409 => "AlreadyExists",
        _ => "InternalError",
    };
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    })
}

/// A pod labelled as an LRP instance with memory and disk limits
pub fn pod_with_limits(name: &str, guid: &str, memory: &str, disk: &str) -> Pod {
    let mut pod = pod(name, guid, "v1", None);
    if let Some(spec) = pod.spec.as_mut() {
        spec.containers[0].resources = Some(ResourceRequirements {
            limits: Some(BTreeMap::from([
                ("memory".to_string(), Quantity(memory.to_string())),
                ("ephemeral-storage".to_string(), Quantity(disk.to_string())),
            ])),
            ..Default::default()
        });
    }
    pod
}

/// A running LRP pod in namespace `apps`, started `start_secs` after the epoch
pub fn pod(name: &str, guid: &str, version: &str, start_secs: Option<i64>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("apps".to_string()),
            labels: Some(BTreeMap::from([
                (LABEL_GUID.to_string(), guid.to_string()),
                (LABEL_VERSION.to_string(), version.to_string()),
                (LABEL_SOURCE_TYPE.to_string(), SOURCE_TYPE_APP.to_string()),
            ])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "app".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus {
            start_time: start_secs
                .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
                .map(Time),
            ..Default::default()
        }),
    }
}

/// An event with `reason` about the given pod
pub fn pod_event(namespace: &str, pod_name: &str, reason: &str) -> Event {
    Event {
        metadata: ObjectMeta {
            name: Some(format!("{}.{}", pod_name, reason.to_lowercase())),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        involved_object: ObjectReference {
            kind: Some("Pod".to_string()),
            name: Some(pod_name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        reason: Some(reason.to_string()),
        ..Default::default()
    }
}

#[derive(Default)]
struct Failures {
    statefulset_list: Option<(u16, String)>,
    statefulset_replace: Option<(u16, String)>,
    pod_list: Option<(u16, String)>,
    metrics_list: Option<(u16, String)>,
    pdb_create: Option<(u16, String)>,
    events: BTreeMap<String, (u16, String)>,
}

#[derive(Default)]
struct State {
    statefulsets: BTreeMap<Key, StatefulSet>,
    pods: BTreeMap<Key, Pod>,
    secrets: BTreeMap<Key, Secret>,
    pdbs: BTreeMap<Key, PodDisruptionBudget>,
    events: Vec<Event>,
    pod_metrics: Vec<PodMetrics>,
    failures: Failures,
    resource_version: u64,
    pdb_creates: usize,
}

impl State {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    /// Run the StatefulSet controller for one set: ordinal pods up to replicas
    fn reconcile_pods(&mut self, namespace: &str, sts: &StatefulSet) {
        let name = sts.metadata.name.clone().unwrap_or_default();
        let spec = sts.spec.clone().unwrap_or_default();
        let replicas = u32::try_from(spec.replicas.unwrap_or(1)).unwrap_or_default();
        let template = spec.template;

        self.pods.retain(|(ns, pod), _| {
            ns != namespace
                || !pod
                    .strip_prefix(&format!("{}-", name))
                    .and_then(|ordinal| ordinal.parse::<u32>().ok())
                    .is_some_and(|ordinal| ordinal >= replicas)
        });

        for index in 0..replicas {
            let pod_name = pod_name(&name, index);
            let key = (namespace.to_string(), pod_name.clone());
            if self.pods.contains_key(&key) {
                continue;
            }
            let metadata = template.metadata.clone().unwrap_or_default();
            self.pods.insert(
                key,
                Pod {
                    metadata: ObjectMeta {
                        name: Some(pod_name),
                        namespace: Some(namespace.to_string()),
                        ..metadata
                    },
                    spec: template.spec.clone(),
                    status: None,
                },
            );
        }
    }
}

fn in_scope(scope: &Option<String>, namespace: &str) -> bool {
    scope.as_deref().map_or(true, |s| s == namespace)
}

fn matches_selector(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.and_then(|l| l.get(key)).is_some_and(|v| v == value),
            None => false,
        })
}

fn failure(injected: &Option<(u16, String)>) -> Result<(), kube::Error> {
    match injected {
        Some((code, message)) => Err(api_error(*code, message)),
        None => Ok(()),
    }
}

/// Shared in-memory cluster; clones see the same state
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
    scope: Option<String>,
}

impl FakeCluster {
    /// Cluster whose list calls only see `namespace`
    pub fn new(namespace: &str) -> Self {
        Self {
            state: Arc::default(),
            scope: Some(namespace.to_string()),
        }
    }

    /// Cluster whose list calls see every namespace
    pub fn cluster_wide() -> Self {
        Self::default()
    }

    /// Insert a pod directly
    pub fn add_pod(&self, pod: Pod) {
        let key = (
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default(),
        );
        self.state.lock().pods.insert(key, pod);
    }

    /// Record an event
    pub fn add_event(&self, event: Event) {
        self.state.lock().events.push(event);
    }

    /// Insert a usage sample
    pub fn add_pod_metrics(&self, sample: PodMetrics) {
        self.state.lock().pod_metrics.push(sample);
    }

    /// Insert a StatefulSet directly, without materialising pods
    pub fn add_statefulset(&self, namespace: &str, mut sts: StatefulSet) {
        let mut state = self.state.lock();
        sts.metadata.namespace = Some(namespace.to_string());
        sts.metadata.resource_version = Some(state.next_version());
        let key = (namespace.to_string(), sts.metadata.name.clone().unwrap_or_default());
        state.statefulsets.insert(key, sts);
    }

    /// Make StatefulSet list calls fail
    pub fn fail_statefulset_list(&self, code: u16, message: &str) {
        self.state.lock().failures.statefulset_list = Some((code, message.to_string()));
    }

    /// Make StatefulSet replace calls fail
    pub fn fail_statefulset_replace(&self, code: u16, message: &str) {
        self.state.lock().failures.statefulset_replace = Some((code, message.to_string()));
    }

    /// Make pod list calls fail
    pub fn fail_pod_list(&self, code: u16, message: &str) {
        self.state.lock().failures.pod_list = Some((code, message.to_string()));
    }

    /// Make metrics list calls fail
    pub fn fail_metrics_list(&self, code: u16, message: &str) {
        self.state.lock().failures.metrics_list = Some((code, message.to_string()));
    }

    /// Make budget create calls fail
    pub fn fail_pdb_create(&self, code: u16, message: &str) {
        self.state.lock().failures.pdb_create = Some((code, message.to_string()));
    }

    /// Make event listing for one pod fail
    pub fn fail_events_for(&self, pod_name: &str, code: u16, message: &str) {
        self.state
            .lock()
            .failures
            .events
            .insert(pod_name.to_string(), (code, message.to_string()));
    }

    /// All StatefulSets, regardless of scope
    pub fn statefulsets(&self) -> Vec<StatefulSet> {
        self.state.lock().statefulsets.values().cloned().collect()
    }

    /// Names of all pods, sorted
    pub fn pod_names(&self) -> Vec<String> {
        self.state
            .lock()
            .pods
            .keys()
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Budget by namespace and name
    pub fn pdb(&self, namespace: &str, name: &str) -> Option<PodDisruptionBudget> {
        self.state
            .lock()
            .pdbs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Secret by namespace and name
    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state
            .lock()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// How many budgets have been created so far
    pub fn pdb_creates(&self) -> usize {
        self.state.lock().pdb_creates
    }
}

#[async_trait]
impl StatefulSetClient for FakeCluster {
    async fn create(
        &self,
        namespace: &str,
        sts: &StatefulSet,
    ) -> Result<StatefulSet, kube::Error> {
        let mut state = self.state.lock();
        let name = sts.metadata.name.clone().unwrap_or_default();
        let key = (namespace.to_string(), name.clone());
        if state.statefulsets.contains_key(&key) {
            return Err(api_error(
                409,
                &format!("statefulsets.apps \"{}\" already exists", name),
            ));
        }

        let mut created = sts.clone();
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.resource_version = Some(state.next_version());
        state.reconcile_pods(namespace, &created);
        state.statefulsets.insert(key, created.clone());
        Ok(created)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<StatefulSet, kube::Error> {
        self.state
            .lock()
            .statefulsets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| api_error(404, &format!("statefulsets.apps \"{}\" not found", name)))
    }

    async fn replace(
        &self,
        namespace: &str,
        sts: &StatefulSet,
    ) -> Result<StatefulSet, kube::Error> {
        let mut state = self.state.lock();
        failure(&state.failures.statefulset_replace)?;

        let name = sts.metadata.name.clone().unwrap_or_default();
        let key = (namespace.to_string(), name.clone());
        let current = state
            .statefulsets
            .get(&key)
            .ok_or_else(|| api_error(404, &format!("statefulsets.apps \"{}\" not found", name)))?;
        if current.metadata.resource_version != sts.metadata.resource_version {
            return Err(api_error(
                409,
                "the object has been modified; please apply your changes to the latest version",
            ));
        }

        let mut replaced = sts.clone();
        replaced.metadata.resource_version = Some(state.next_version());
        state.reconcile_pods(namespace, &replaced);
        state.statefulsets.insert(key, replaced.clone());
        Ok(replaced)
    }

    async fn list(&self, selector: &str) -> Result<Vec<StatefulSet>, kube::Error> {
        let state = self.state.lock();
        failure(&state.failures.statefulset_list)?;
        Ok(state
            .statefulsets
            .iter()
            .filter(|((ns, _), sts)| {
                in_scope(&self.scope, ns) && matches_selector(sts.metadata.labels.as_ref(), selector)
            })
            .map(|(_, sts)| sts.clone())
            .collect())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        let mut state = self.state.lock();
        let key = (namespace.to_string(), name.to_string());
        let sts = state
            .statefulsets
            .remove(&key)
            .ok_or_else(|| api_error(404, &format!("statefulsets.apps \"{}\" not found", name)))?;

        let selector = sts
            .spec
            .and_then(|s| s.selector.match_labels)
            .unwrap_or_default();
        state.pods.retain(|(ns, _), pod| {
            ns != namespace
                || !selector
                    .iter()
                    .all(|(k, v)| pod.metadata.labels.as_ref().and_then(|l| l.get(k)) == Some(v))
        });
        Ok(())
    }
}

#[async_trait]
impl PodClient for FakeCluster {
    async fn list(&self, selector: &str) -> Result<Vec<Pod>, kube::Error> {
        let state = self.state.lock();
        failure(&state.failures.pod_list)?;
        Ok(state
            .pods
            .iter()
            .filter(|((ns, _), pod)| {
                in_scope(&self.scope, ns) && matches_selector(pod.metadata.labels.as_ref(), selector)
            })
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        self.state
            .lock()
            .pods
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| api_error(404, &format!("pods \"{}\" not found", name)))
    }
}

#[async_trait]
impl SecretClient for FakeCluster {
    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, kube::Error> {
        let mut state = self.state.lock();
        let name = secret.metadata.name.clone().unwrap_or_default();
        let key = (namespace.to_string(), name.clone());
        if state.secrets.contains_key(&key) {
            return Err(api_error(409, &format!("secrets \"{}\" already exists", name)));
        }
        let mut created = secret.clone();
        created.metadata.namespace = Some(namespace.to_string());
        state.secrets.insert(key, created.clone());
        Ok(created)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        self.state
            .lock()
            .secrets
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| api_error(404, &format!("secrets \"{}\" not found", name)))
    }
}

#[async_trait]
impl PodDisruptionBudgetClient for FakeCluster {
    async fn create(
        &self,
        namespace: &str,
        pdb: &PodDisruptionBudget,
    ) -> Result<PodDisruptionBudget, kube::Error> {
        let mut state = self.state.lock();
        failure(&state.failures.pdb_create)?;

        let name = pdb.metadata.name.clone().unwrap_or_default();
        let key = (namespace.to_string(), name.clone());
        if state.pdbs.contains_key(&key) {
            return Err(api_error(
                409,
                &format!("poddisruptionbudgets.policy \"{}\" already exists", name),
            ));
        }
        let mut created = pdb.clone();
        created.metadata.namespace = Some(namespace.to_string());
        state.pdbs.insert(key, created.clone());
        state.pdb_creates += 1;
        Ok(created)
    }

    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodDisruptionBudget>, kube::Error> {
        Ok(self
            .state
            .lock()
            .pdbs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        self.state
            .lock()
            .pdbs
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| {
                api_error(
                    404,
                    &format!("poddisruptionbudgets.policy \"{}\" not found", name),
                )
            })
    }
}

#[async_trait]
impl EventClient for FakeCluster {
    async fn list_for_pod(
        &self,
        namespace: &str,
        pod_name: &str,
    ) -> Result<Vec<Event>, kube::Error> {
        let state = self.state.lock();
        failure(&state.failures.events.get(pod_name).cloned())?;
        Ok(state
            .events
            .iter()
            .filter(|e| {
                e.involved_object.namespace.as_deref() == Some(namespace)
                    && e.involved_object.name.as_deref() == Some(pod_name)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PodMetricsClient for FakeCluster {
    async fn list(&self) -> Result<Vec<PodMetrics>, kube::Error> {
        let state = self.state.lock();
        failure(&state.failures.metrics_list)?;
        Ok(state
            .pod_metrics
            .iter()
            .filter(|m| in_scope(&self.scope, m.metadata.namespace.as_deref().unwrap_or_default()))
            .cloned()
            .collect())
    }
}
