#![deny(rust_2018_idioms)]

pub mod fixtures;
mod metrics;
mod report;
mod rounds;

pub use self::{
    metrics::Latencies,
    report::{CaseReport, Report},
    rounds::{Deploy, Deployed, Phase, Rounds},
};
use anyhow::{bail, Context, Result};
use attach_bench_cluster::{Cluster, Workloads};
use attach_bench_core::{parse_duration, Backoff, Executor, Launcher, Policy, Waiter};
use attach_bench_populate::Tree;
use clap::Parser;
use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim};
use kube::{config::KubeConfigOptions, Client, Config};
use std::{fs, io, path::PathBuf};
use tokio::{
    signal::{
        ctrl_c,
        unix::{signal, SignalKind},
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

#[derive(Clone, Debug, Parser)]
#[clap(name = "run", about = "Measure volume attach latency")]
pub struct Cmd {
    /// Storage class to benchmark; may be repeated. The cluster default is used when omitted.
    #[clap(long = "storage-class")]
    storage_classes: Vec<String>,

    #[clap(
        long,
        value_delimiter = ',',
        default_values = &["1", "4", "9", "15", "30", "60", "120"]
    )]
    file_counts: Vec<u32>,

    #[clap(long, value_delimiter = ',', default_values = &["6"])]
    dir_counts: Vec<u32>,

    #[clap(long, value_delimiter = ',', default_values = &["5"])]
    dir_depths: Vec<u32>,

    #[clap(long, default_value = "5")]
    rounds: usize,

    #[clap(long, parse(try_from_str = parse_duration), default_value = "10s")]
    settle: Duration,

    /// Limits each wait for readiness. `0` waits indefinitely.
    #[clap(long, parse(try_from_str = parse_duration), default_value = "10m")]
    wait_timeout: Duration,

    /// Comma-separated `status=action` pairs, where the action is `retry` or `ignore`.
    #[clap(long, default_value = "500=retry")]
    retry_policy: Policy,

    #[clap(long, parse(try_from_str = parse_duration), default_value = "1s")]
    retry_backoff: Duration,

    #[clap(long, parse(try_from_str = parse_duration), default_value = "30s")]
    retry_max_backoff: Duration,

    /// Maximum attempts per call. `0` retries indefinitely.
    #[clap(long, default_value = "10")]
    retry_attempts: usize,

    #[clap(long, default_value = "50Gi")]
    claim_size: String,

    #[clap(long, default_value = "attach")]
    namespace_prefix: String,

    #[clap(long, default_value = "quay.io/shyamsundarr/filecounts:test")]
    populate_image: String,

    /// Overrides the populate image's entrypoint; may be repeated.
    #[clap(long)]
    populate_command: Vec<String>,

    #[clap(long, default_value = "busybox")]
    app_image: String,

    /// The kubeconfig context to use instead of the current one.
    #[clap(long)]
    context: Option<String>,

    /// Writes the JSON report here instead of stdout.
    #[clap(long)]
    report: Option<PathBuf>,
}

/// One point in the parameter matrix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Case {
    pub storage_class: Option<String>,
    pub tree: Tree,
}

/// Everything a case needs, shared across the run.
struct Bench {
    client: Client,
    launcher: Launcher,
    policy: Policy,
    rounds: Rounds,
    cancel: CancellationToken,
    claim_size: String,
    populate_image: String,
    populate_command: Vec<String>,
    app_image: String,
    namespace_prefix: String,
}

// === impl Cmd ===

impl Cmd {
    pub async fn run(self) -> Result<()> {
        let cases = self.cases();
        let Self {
            rounds,
            settle,
            wait_timeout,
            retry_policy,
            retry_backoff,
            retry_max_backoff,
            retry_attempts,
            claim_size,
            namespace_prefix,
            populate_image,
            populate_command,
            app_image,
            context,
            report,
            ..
        } = self;

        let client = connect(context).await?;

        let cancel = CancellationToken::new();
        cancel_on_signal(cancel.clone())?;

        let backoff = Backoff::exponential(retry_backoff, retry_max_backoff)
            .with_attempts(Some(retry_attempts).filter(|n| *n > 0));
        let deadline = Some(wait_timeout).filter(|d| !d.is_zero());
        let launcher = Launcher::new(
            Executor::new(retry_policy.clone(), backoff),
            Waiter::new(deadline).with_cancel(cancel.clone()),
        );
        info!(policy = %retry_policy, ?backoff, ?deadline, cases = cases.len(), "Starting");

        let bench = Bench {
            client,
            launcher,
            policy: retry_policy,
            rounds: Rounds {
                count: rounds,
                settle,
            },
            cancel: cancel.clone(),
            claim_size,
            populate_image,
            populate_command,
            app_image,
            namespace_prefix,
        };

        let mut results = Report::default();
        for case in cases.iter() {
            if cancel.is_cancelled() {
                warn!("Cancelled; skipping remaining cases");
                break;
            }
            let span = info_span!(
                "case",
                class = case.storage_class.as_deref().unwrap_or("default"),
                files = case.tree.files,
                dirs = case.tree.dirs,
                depth = case.tree.depth,
            );
            let (latencies, error) = match bench.run(case).instrument(span).await {
                Ok(latencies) => (latencies, None),
                Err(e) => {
                    error!(error = %format!("{:#}", e), "Case failed");
                    (Latencies::default(), Some(format!("{:#}", e)))
                }
            };
            results
                .cases
                .push(CaseReport::new(case, &latencies, error));
        }

        write_report(&results, report)?;

        let failed = results.failed();
        if failed > 0 {
            bail!("{} of {} cases failed", failed, cases.len());
        }
        Ok(())
    }

    /// Storage classes × file counts × directory counts × directory depths.
    fn cases(&self) -> Vec<Case> {
        let classes = if self.storage_classes.is_empty() {
            vec![None]
        } else {
            self.storage_classes.iter().cloned().map(Some).collect()
        };

        let mut cases = Vec::new();
        for storage_class in classes {
            for &files in &self.file_counts {
                for &dirs in &self.dir_counts {
                    for &depth in &self.dir_depths {
                        cases.push(Case {
                            storage_class: storage_class.clone(),
                            tree: Tree::new(files, dirs, depth),
                        });
                    }
                }
            }
        }
        cases
    }
}

// === impl Bench ===

impl Bench {
    /// Runs a case in a fresh namespace and always tears the namespace down afterwards.
    async fn run(&self, case: &Case) -> Result<Latencies> {
        let name = fixtures::namespace_name(&self.namespace_prefix, &mut rand::thread_rng());
        let namespaces = Cluster::<Namespace>::all(self.client.clone());
        self.launcher
            .create(&namespaces, &fixtures::namespace(&name)?)
            .await
            .with_context(|| format!("creating namespace {}", name))?;
        info!(namespace = %name, "Created");

        let workloads = Workloads::new(self.client.clone(), &name, self.launcher.clone());
        let deployment = fixtures::deployment(&self.app_image)?;
        let deployed = Deployed {
            workloads: &workloads,
            deployment: &deployment,
            name: fixtures::DEPLOYMENT,
        };

        let measured = self.measure(case, &workloads, &deployed).await;
        let torn_down = self.teardown(&namespaces, &deployed).await;
        let latencies = measured?;
        torn_down.context("tearing down")?;
        Ok(latencies)
    }

    async fn measure(
        &self,
        case: &Case,
        workloads: &Workloads,
        deployed: &Deployed<'_>,
    ) -> Result<Latencies> {
        let claim = fixtures::claim(case.storage_class.as_deref(), &self.claim_size)?;
        workloads
            .create(&claim)
            .await
            .context("creating claim")?;

        let job = fixtures::populate_job(&self.populate_image, &self.populate_command, case.tree)?;
        workloads
            .complete_job(&job)
            .await
            .context("populating claim")?;
        info!(tree = ?case.tree, "Populated");

        self.rounds.measure(deployed, &self.cancel).await
    }

    /// Deletes the deployment, claim and namespace. Objects that are already gone are fine, and
    /// every deletion is attempted even if an earlier one fails.
    async fn teardown(&self, namespaces: &Cluster<Namespace>, deployed: &Deployed<'_>) -> Result<()> {
        let policy = self.policy.clone().ignore(404);
        let namespace = deployed.workloads.namespace();
        let results = [
            deployed.remove(policy.clone()).await,
            deployed
                .workloads
                .delete_with::<PersistentVolumeClaim>(policy.clone(), fixtures::CLAIM)
                .await,
            self.launcher
                .delete_with::<Namespace, _>(policy, namespaces, namespace)
                .await,
        ];
        info!(%namespace, "Torn down");

        for res in results {
            res?;
        }
        Ok(())
    }
}

async fn connect(context: Option<String>) -> Result<Client> {
    let config = match context {
        Some(context) => {
            let options = KubeConfigOptions {
                context: Some(context),
                ..KubeConfigOptions::default()
            };
            Config::from_kubeconfig(&options).await?
        }
        None => Config::infer().await?,
    };
    Ok(Client::try_from(config)?)
}

fn cancel_on_signal(cancel: CancellationToken) -> Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = ctrl_c() => {}
            _ = term.recv() => {}
        }
        warn!("Signaled; cancelling");
        cancel.cancel();
    });
    Ok(())
}

fn write_report(report: &Report, path: Option<PathBuf>) -> Result<()> {
    match path {
        Some(path) => {
            let file = fs::File::create(&path)
                .with_context(|| format!("creating {}", path.display()))?;
            serde_json::to_writer_pretty(file, report)?;
            info!(path = %path.display(), "Wrote report");
        }
        None => {
            let stdout = io::stdout();
            serde_json::to_writer_pretty(stdout.lock(), report)?;
            println!();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cmd {
        Cmd::try_parse_from(std::iter::once("run").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        let cmd = parse(&[]);
        assert_eq!(cmd.file_counts, vec![1, 4, 9, 15, 30, 60, 120]);
        assert_eq!(cmd.dir_counts, vec![6]);
        assert_eq!(cmd.dir_depths, vec![5]);
        assert_eq!(cmd.rounds, 5);
        assert_eq!(cmd.settle, Duration::from_secs(10));
        assert_eq!(cmd.retry_policy, Policy::default());
        assert_eq!(cmd.claim_size, "50Gi");
        assert_eq!(cmd.app_image, "busybox");

        let cases = cmd.cases();
        assert_eq!(cases.len(), 7);
        assert!(cases.iter().all(|c| c.storage_class.is_none()));
        assert_eq!(cases[0].tree, Tree::new(1, 6, 5));
        assert_eq!(cases[6].tree, Tree::new(120, 6, 5));
    }

    #[test]
    fn case_matrix() {
        let cmd = parse(&[
            "--storage-class=fast",
            "--storage-class=slow",
            "--file-counts=1,2",
            "--dir-counts=3",
            "--dir-depths=1,2",
            "--retry-policy=500=retry,409=ignore",
            "--settle=0",
        ]);
        assert_eq!(cmd.settle, Duration::ZERO);
        assert_eq!(
            cmd.retry_policy,
            Policy::default().ignore(409)
        );

        let cases = cmd.cases();
        assert_eq!(cases.len(), 2 * 2 * 2);
        assert_eq!(
            cases[0],
            Case {
                storage_class: Some("fast".to_string()),
                tree: Tree::new(1, 3, 1),
            }
        );
        assert_eq!(
            cases[7],
            Case {
                storage_class: Some("slow".to_string()),
                tree: Tree::new(2, 3, 2),
            }
        );
    }

    #[test]
    fn invalid_flags() {
        let run = |args: &[&str]| {
            Cmd::try_parse_from(std::iter::once("run").chain(args.iter().copied())).is_err()
        };
        assert!(run(&["--retry-policy=teapot"]));
        assert!(run(&["--retry-policy=500=panic"]));
        assert!(run(&["--settle=soon"]));
        assert!(run(&["--file-counts=1,x"]));
    }
}
