//! Manifests for the objects a benchmark case creates.

use attach_bench_populate::Tree;
use k8s_openapi::api::{
    apps::v1::Deployment,
    batch::v1::Job,
    core::v1::{Namespace, PersistentVolumeClaim},
};
use rand::Rng;
use serde_json::json;

pub const CLAIM: &str = "mypvc";
pub const JOB: &str = "mypod";
pub const DEPLOYMENT: &str = "mypod-deployment";

const MOUNT: &str = "/mnt";
const APP: &str = "mypod";

/// `<prefix>-<8 random lowercase alphanumerics>`.
pub fn namespace_name<R: Rng>(prefix: &str, rng: &mut R) -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let suffix = (0..8)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect::<String>();
    format!("{}-{}", prefix, suffix)
}

pub fn namespace(name: &str) -> serde_json::Result<Namespace> {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name },
    }))
}

/// A single-writer claim. Without a storage class the cluster default applies.
pub fn claim(storage_class: Option<&str>, size: &str) -> serde_json::Result<PersistentVolumeClaim> {
    let mut spec = json!({
        "accessModes": ["ReadWriteOnce"],
        "resources": { "requests": { "storage": size } },
    });
    if let Some(class) = storage_class {
        spec["storageClassName"] = json!(class);
    }
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": { "name": CLAIM },
        "spec": spec,
    }))
}

/// A job that fills the claim with `tree`. An empty `command` keeps the image's entrypoint.
pub fn populate_job(image: &str, command: &[String], tree: Tree) -> serde_json::Result<Job> {
    let mut container = json!({
        "name": "attach-time-tester",
        "image": image,
        "imagePullPolicy": "IfNotPresent",
        "args": tree.args(MOUNT),
        "volumeMounts": [{ "name": "data", "mountPath": MOUNT }],
    });
    if !command.is_empty() {
        container["command"] = json!(command);
    }
    serde_json::from_value(json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": { "name": JOB },
        "spec": {
            "template": {
                "spec": {
                    "containers": [container],
                    "restartPolicy": "Never",
                    "terminationGracePeriodSeconds": 0,
                    "volumes": [{
                        "name": "data",
                        "persistentVolumeClaim": { "claimName": CLAIM },
                    }],
                },
            },
        },
    }))
}

/// A one-replica deployment that idles with the claim mounted.
pub fn deployment(image: &str) -> serde_json::Result<Deployment> {
    serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": DEPLOYMENT,
            "labels": { "app": APP },
        },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": { "app": APP } },
            "template": {
                "metadata": { "labels": { "app": APP } },
                "spec": {
                    "containers": [{
                        "name": "busybox",
                        "image": image,
                        "imagePullPolicy": "IfNotPresent",
                        "command": ["sleep", "99999"],
                        "volumeMounts": [{ "name": CLAIM, "mountPath": MOUNT }],
                    }],
                    "terminationGracePeriodSeconds": 0,
                    "volumes": [{
                        "name": CLAIM,
                        "persistentVolumeClaim": { "claimName": CLAIM },
                    }],
                },
            },
        },
    }))
}
