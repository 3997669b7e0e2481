use crate::metrics::Latencies;
use anyhow::{bail, Result};
use attach_bench_cluster::Workloads;
use attach_bench_core::{LaunchError, Policy};
use k8s_openapi::api::apps::v1::Deployment;
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Where the round loop stands. Only a steady round has a deployment from the previous round to
/// remove.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Initial,
    Steady,
}

/// Starts and stops the measured workload.
#[async_trait::async_trait]
pub trait Deploy {
    async fn start(&self) -> Result<(), LaunchError>;

    async fn stop(&self) -> Result<(), LaunchError>;
}

#[derive(Clone, Debug)]
pub struct Rounds {
    pub count: usize,
    pub settle: Duration,
}

/// A deployment launched through [`Workloads`].
pub struct Deployed<'a> {
    pub workloads: &'a Workloads,
    pub deployment: &'a Deployment,
    pub name: &'a str,
}

// === impl Rounds ===

impl Rounds {
    /// Times how long the workload takes to become ready, once per round. Each round but the
    /// first removes the previous round's workload, then lets the cluster settle before starting
    /// again. The last round's workload is left running.
    pub async fn measure<D: Deploy + Sync>(
        &self,
        deploy: &D,
        cancel: &CancellationToken,
    ) -> Result<Latencies> {
        let mut latencies = Latencies::default();
        let mut phase = Phase::Initial;
        for round in 1..=self.count {
            if phase == Phase::Steady {
                deploy.stop().await?;
            }

            debug!(round, settle = ?self.settle, "Settling");
            tokio::select! {
                _ = cancel.cancelled() => bail!("cancelled while settling"),
                _ = time::sleep(self.settle) => {}
            }

            let t0 = Instant::now();
            deploy.start().await?;
            let elapsed = Instant::now() - t0;
            info!(round, ?elapsed, "Ready");
            latencies.record(elapsed);
            phase = Phase::Steady;
        }
        Ok(latencies)
    }
}

// === impl Deployed ===

#[async_trait::async_trait]
impl<'a> Deploy for Deployed<'a> {
    async fn start(&self) -> Result<(), LaunchError> {
        self.workloads.start_deployment(self.deployment).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), LaunchError> {
        self.workloads.delete::<Deployment>(self.name).await
    }
}

impl<'a> Deployed<'a> {
    /// Removes the deployment, tolerating one that is already gone.
    pub async fn remove(&self, policy: Policy) -> Result<(), LaunchError> {
        self.workloads
            .delete_with::<Deployment>(policy, self.name)
            .await
    }
}
