use crate::{conditions, Cluster};
use attach_bench_core::{LaunchError, Launcher, Policy};
use k8s_openapi::{
    api::{apps::v1::Deployment, batch::v1::Job, core::v1::Pod},
    NamespaceResourceScope,
};
use kube::{Client, Resource};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use tracing::{debug_span, Instrument};

/// Launches workloads into a single namespace.
#[derive(Clone)]
pub struct Workloads {
    client: Client,
    namespace: String,
    launcher: Launcher,
}

impl Workloads {
    pub fn new(client: Client, namespace: impl Into<String>, launcher: Launcher) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            launcher,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Creates a pod and waits for it to be running.
    pub async fn start_pod(&self, pod: &Pod) -> Result<Pod, LaunchError> {
        let pods = self.api::<Pod>();
        self.launcher
            .launch(&pods, pod, |_| conditions::pod_running)
            .instrument(debug_span!("pod", ns = %self.namespace))
            .await
    }

    /// Creates a deployment and waits until all of its desired replicas are ready.
    pub async fn start_deployment(&self, deployment: &Deployment) -> Result<Deployment, LaunchError> {
        let deployments = self.api::<Deployment>();
        self.launcher
            .launch(&deployments, deployment, |created| {
                conditions::deployment_ready(conditions::desired_replicas(created))
            })
            .instrument(debug_span!("deployment", ns = %self.namespace))
            .await
    }

    /// Runs a job until it succeeds, then deletes it and every pod in the namespace.
    pub async fn complete_job(&self, job: &Job) -> Result<Job, LaunchError> {
        let jobs = self.api::<Job>();
        let pods = self.api::<Pod>();
        self.launcher
            .run_to_completion(&jobs, &pods, job, conditions::job_succeeded)
            .instrument(debug_span!("job", ns = %self.namespace))
            .await
    }

    pub async fn create<K>(&self, object: &K) -> Result<K, LaunchError>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + DeserializeOwned
            + Serialize
            + Send
            + Sync
            + 'static,
        K::DynamicType: Default,
    {
        self.launcher.create(&self.api::<K>(), object).await
    }

    pub async fn delete<K>(&self, name: &str) -> Result<(), LaunchError>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + DeserializeOwned
            + Serialize
            + Send
            + Sync
            + 'static,
        K::DynamicType: Default,
    {
        self.launcher.delete(&self.api::<K>(), name).await
    }

    pub async fn delete_with<K>(&self, policy: Policy, name: &str) -> Result<(), LaunchError>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + DeserializeOwned
            + Serialize
            + Send
            + Sync
            + 'static,
        K::DynamicType: Default,
    {
        self.launcher
            .delete_with(policy, &self.api::<K>(), name)
            .await
    }

    fn api<K>(&self) -> Cluster<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Cluster::namespaced(self.client.clone(), &self.namespace)
    }
}
