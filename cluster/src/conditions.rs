//! Readiness predicates over object status snapshots.

use k8s_openapi::api::{apps::v1::Deployment, batch::v1::Job, core::v1::Pod};

pub fn pod_running(pod: &Pod) -> bool {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
}

/// Holds once the number of ready replicas reaches `replicas`. A status that does not report
/// ready replicas counts as zero.
pub fn deployment_ready(replicas: i32) -> impl Fn(&Deployment) -> bool {
    move |deployment| {
        let ready = deployment
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        ready == replicas
    }
}

/// The replica count a deployment asks for, which the API server defaults to 1.
pub fn desired_replicas(deployment: &Deployment) -> i32 {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1)
}

pub fn job_succeeded(job: &Job) -> bool {
    job.status.as_ref().and_then(|s| s.succeeded) == Some(1)
}
