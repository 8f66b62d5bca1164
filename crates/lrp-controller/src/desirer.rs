//! LRP reconciler backed by StatefulSets
//!
//! Every read path finds the workload by its `{guid, version}` labels, never
//! by derived name. Nothing here retries or locks: concurrent writers to the
//! same LRP are arbitrated by the API server's resource versions, and any
//! conflict is returned to the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use tracing::{debug, info, instrument};

use lrp_common::error::{is_kube_conflict, is_kube_not_found};
use lrp_common::labels::{
    is_bridge_annotation, pod_name, registry_secret_name, ANNOTATION_LAST_UPDATED,
    ANNOTATION_REGISTERED_ROUTES, LABEL_SOURCE_TYPE, SOURCE_TYPE_APP,
};
use lrp_common::{Error, Instance, Lrp, LrpIdentifier, Result};
use lrp_workload::{disruption_budget, lrp_from_statefulset, NameStrategy, StatefulSetTranslator};

use crate::clients::{
    EventClient, KubeClients, PodClient, PodDisruptionBudgetClient, SecretClient,
    StatefulSetClient,
};
use crate::status::InstanceStatusAggregator;

/// Desired-state operations on LRPs
#[async_trait]
pub trait Desirer: Send + Sync {
    /// Create the workload for an LRP
    async fn desire(&self, lrp: &Lrp) -> Result<()>;

    /// Apply instance count, last-updated and routes changes to an existing LRP
    async fn update(&self, lrp: &Lrp) -> Result<()>;

    /// Read one LRP back
    async fn get(&self, id: &LrpIdentifier) -> Result<Lrp>;

    /// Read every LRP in scope
    async fn list(&self) -> Result<Vec<Lrp>>;

    /// Remove an LRP and everything created for it
    async fn stop(&self, id: &LrpIdentifier) -> Result<()>;

    /// Remove a single instance; the StatefulSet will recreate it
    async fn stop_instance(&self, id: &LrpIdentifier, index: u32) -> Result<()>;

    /// Currently running instances
    async fn get_instances(&self, id: &LrpIdentifier) -> Result<Vec<Instance>>;
}

/// Cluster clients the desirer works through
#[derive(Clone)]
pub struct DesirerClients {
    /// StatefulSets
    pub statefulsets: Arc<dyn StatefulSetClient>,
    /// Pods
    pub pods: Arc<dyn PodClient>,
    /// Registry credential secrets
    pub secrets: Arc<dyn SecretClient>,
    /// Disruption budgets
    pub disruption_budgets: Arc<dyn PodDisruptionBudgetClient>,
    /// Pod events
    pub events: Arc<dyn EventClient>,
}

impl From<KubeClients> for DesirerClients {
    fn from(clients: KubeClients) -> Self {
        Self {
            statefulsets: Arc::new(clients.clone()),
            pods: Arc::new(clients.clone()),
            secrets: Arc::new(clients.clone()),
            disruption_budgets: Arc::new(clients.clone()),
            events: Arc::new(clients),
        }
    }
}

/// [`Desirer`] mapping each LRP onto one StatefulSet
pub struct StatefulSetDesirer {
    namespace: String,
    clients: DesirerClients,
    naming: NameStrategy,
    translator: StatefulSetTranslator,
    status: InstanceStatusAggregator,
}

impl StatefulSetDesirer {
    /// Create a desirer that creates workloads in `namespace`
    pub fn new(
        namespace: impl Into<String>,
        clients: DesirerClients,
        naming: NameStrategy,
        translator: StatefulSetTranslator,
    ) -> Self {
        let status = InstanceStatusAggregator::new(clients.pods.clone(), clients.events.clone());
        Self {
            namespace: namespace.into(),
            clients,
            naming,
            translator,
            status,
        }
    }

    async fn find_statefulset(
        &self,
        id: &LrpIdentifier,
        context: &str,
    ) -> Result<Option<StatefulSet>> {
        let mut found = self
            .clients
            .statefulsets
            .list(&id.label_selector())
            .await
            .map_err(|e| Error::remote(context, e))?;

        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            count => Err(Error::ambiguous(format!(
                "{}: {} statefulsets match {}",
                context, count, id
            ))),
        }
    }

    /// Create or delete the budget named `name` so it matches `desired`
    async fn reconcile_disruption_budget(
        &self,
        namespace: &str,
        name: &str,
        desired: Option<&PodDisruptionBudget>,
    ) -> Result<()> {
        let budgets = &self.clients.disruption_budgets;
        let existing = budgets
            .get(namespace, name)
            .await
            .map_err(|e| Error::remote("failed to get pod disruption budget", e))?;

        match (desired, existing.is_some()) {
            (Some(pdb), false) => {
                match budgets.create(namespace, pdb).await {
                    Ok(_) => info!(name = %name, "created pod disruption budget"),
                    Err(e) if is_kube_conflict(&e) => {
                        debug!(name = %name, "pod disruption budget already exists")
                    }
                    Err(e) => {
                        return Err(Error::remote("failed to create pod disruption budget", e))
                    }
                }
            }
            (None, true) => {
                delete_tolerating_absence(
                    budgets.delete(namespace, name).await,
                    "failed to delete pod disruption budget",
                )?;
                info!(name = %name, "deleted pod disruption budget");
            }
            _ => debug!(name = %name, "pod disruption budget already as desired"),
        }
        Ok(())
    }
}

fn delete_tolerating_absence(
    result: std::result::Result<(), kube::Error>,
    context: &str,
) -> Result<()> {
    match result {
        Err(e) if !is_kube_not_found(&e) => Err(Error::remote(context, e)),
        _ => Ok(()),
    }
}

fn bridge_annotations(sts: &StatefulSet) -> BTreeMap<&str, &str> {
    sts.metadata
        .annotations
        .iter()
        .flatten()
        .filter(|(key, _)| is_bridge_annotation(key))
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect()
}

/// Whether an existing workload is the one a repeated desire would create
fn is_same_desire(existing: &StatefulSet, desired: &StatefulSet) -> bool {
    existing.metadata.labels == desired.metadata.labels
        && bridge_annotations(existing) == bridge_annotations(desired)
}

fn object_coordinates(sts: &StatefulSet, default_namespace: &str) -> (String, String) {
    (
        sts.metadata
            .namespace
            .clone()
            .unwrap_or_else(|| default_namespace.to_string()),
        sts.metadata.name.clone().unwrap_or_default(),
    )
}

#[async_trait]
impl Desirer for StatefulSetDesirer {
    #[instrument(skip(self, lrp), fields(lrp = %lrp.id()))]
    async fn desire(&self, lrp: &Lrp) -> Result<()> {
        let name = self.naming.name(lrp)?;
        let graph = self.translator.translate(&name, lrp);
        let namespace = self.namespace.as_str();
        if namespace.is_empty() {
            return Err(Error::config("no namespace configured for new workloads"));
        }

        if let Some(secret) = &graph.registry_secret {
            match self.clients.secrets.create(namespace, secret).await {
                Ok(_) => info!(name = %name, "created registry credentials"),
                Err(e) if is_kube_conflict(&e) => {
                    debug!(name = %name, "registry credentials already exist")
                }
                Err(e) => return Err(Error::remote("failed to create registry secret", e)),
            }
        }

        match self
            .clients
            .statefulsets
            .create(namespace, &graph.statefulset)
            .await
        {
            Ok(_) => info!(name = %name, namespace = %namespace, "created statefulset"),
            Err(e) if is_kube_conflict(&e) => {
                let existing = self
                    .clients
                    .statefulsets
                    .get(namespace, &name)
                    .await
                    .map_err(|e| Error::remote("failed to get statefulset", e))?;
                if !is_same_desire(&existing, &graph.statefulset) {
                    return Err(Error::remote("failed to create statefulset", e));
                }
                debug!(name = %name, "statefulset already desired");
            }
            Err(e) => return Err(Error::remote("failed to create statefulset", e)),
        }

        self.reconcile_disruption_budget(namespace, &name, graph.disruption_budget.as_ref())
            .await
    }

    #[instrument(skip(self, lrp), fields(lrp = %lrp.id()))]
    async fn update(&self, lrp: &Lrp) -> Result<()> {
        let mut sts = self
            .find_statefulset(lrp.id(), "failed to get statefulset")
            .await?
            .ok_or_else(|| Error::not_found("failed to get statefulset: statefulset not found"))?;
        let (namespace, name) = object_coordinates(&sts, &self.namespace);

        if let Some(spec) = sts.spec.as_mut() {
            spec.replicas = Some(i32::try_from(lrp.target_instances).unwrap_or(i32::MAX));
        }

        let annotations = sts.metadata.annotations.get_or_insert_with(BTreeMap::new);
        annotations.insert(
            ANNOTATION_LAST_UPDATED.to_string(),
            lrp.metadata.last_updated.clone(),
        );
        let routes = &lrp.metadata.app_uris;
        if !routes.is_empty() && annotations.get(ANNOTATION_REGISTERED_ROUTES) != Some(routes) {
            annotations.insert(ANNOTATION_REGISTERED_ROUTES.to_string(), routes.clone());
        }

        self.clients
            .statefulsets
            .replace(&namespace, &sts)
            .await
            .map_err(|e| Error::remote("failed to update statefulset", e))?;
        info!(name = %name, replicas = lrp.target_instances, "updated statefulset");

        let budget = disruption_budget::should_exist(lrp.target_instances)
            .then(|| disruption_budget::build(&name, lrp.id()));
        self.reconcile_disruption_budget(&namespace, &name, budget.as_ref())
            .await
    }

    #[instrument(skip(self), fields(lrp = %id))]
    async fn get(&self, id: &LrpIdentifier) -> Result<Lrp> {
        let sts = self
            .find_statefulset(id, "failed to list statefulsets")
            .await?
            .ok_or_else(|| Error::not_found("statefulset not found"))?;
        Ok(lrp_from_statefulset(&sts))
    }

    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<Lrp>> {
        let selector = format!("{}={}", LABEL_SOURCE_TYPE, SOURCE_TYPE_APP);
        let statefulsets = self
            .clients
            .statefulsets
            .list(&selector)
            .await
            .map_err(|e| Error::remote("failed to list statefulsets", e))?;
        debug!(count = statefulsets.len(), "listed statefulsets");
        Ok(statefulsets.iter().map(lrp_from_statefulset).collect())
    }

    #[instrument(skip(self), fields(lrp = %id))]
    async fn stop(&self, id: &LrpIdentifier) -> Result<()> {
        let sts = self
            .find_statefulset(id, "failed to list statefulsets")
            .await?
            .ok_or_else(|| Error::not_found("statefulset not found"))?;
        let (namespace, name) = object_coordinates(&sts, &self.namespace);

        delete_tolerating_absence(
            self.clients
                .disruption_budgets
                .delete(&namespace, &name)
                .await,
            "failed to delete pod disruption budget",
        )?;
        delete_tolerating_absence(
            self.clients
                .secrets
                .delete(&namespace, &registry_secret_name(&name))
                .await,
            "failed to delete registry secret",
        )?;
        delete_tolerating_absence(
            self.clients.statefulsets.delete(&namespace, &name).await,
            "failed to delete statefulset",
        )?;

        info!(name = %name, namespace = %namespace, "stopped LRP");
        Ok(())
    }

    #[instrument(skip(self), fields(lrp = %id))]
    async fn stop_instance(&self, id: &LrpIdentifier, index: u32) -> Result<()> {
        let sts = self
            .find_statefulset(id, "failed to get statefulset")
            .await?
            .ok_or_else(|| Error::not_found("app does not exist"))?;
        let (namespace, name) = object_coordinates(&sts, &self.namespace);
        let pod = pod_name(&name, index);

        self.clients
            .pods
            .delete(&namespace, &pod)
            .await
            .map_err(|e| Error::remote("failed to delete pod", e))?;
        info!(pod = %pod, "stopped instance");
        Ok(())
    }

    async fn get_instances(&self, id: &LrpIdentifier) -> Result<Vec<Instance>> {
        self.status.get_instances(id).await
    }
}
