use crate::{ApiError, Condition, Executor, Policy, Resources, WaitError, Waiter, Watch};
use tracing::{debug, info};

/// Creates objects and waits for them to become ready, routing every API call through an
/// [`Executor`].
#[derive(Clone, Debug, Default)]
pub struct Launcher {
    calls: Executor,
    waiter: Waiter,
}

#[derive(Debug)]
pub enum LaunchError {
    Api(ApiError),
    /// The create call failed with a status the policy ignores, so there is no object to wait on.
    Ignored,
    Unnamed,
    Wait(WaitError),
}

// === impl Launcher ===

impl Launcher {
    pub fn new(calls: Executor, waiter: Waiter) -> Self {
        Self { calls, waiter }
    }

    pub async fn create<K, A>(&self, api: &A, object: &K) -> Result<K, LaunchError>
    where
        K: Send + Sync + 'static,
        A: Resources<K>,
    {
        self.calls
            .call(|| api.create(object))
            .await?
            .ok_or(LaunchError::Ignored)
    }

    /// Creates `object`, then waits until the condition built from the created object holds.
    /// Returns the snapshot that satisfied it.
    pub async fn launch<K, A, F, C>(
        &self,
        api: &A,
        object: &K,
        condition_for: F,
    ) -> Result<K, LaunchError>
    where
        K: Send + Sync + 'static,
        A: Resources<K> + Watch<K>,
        F: FnOnce(&K) -> C,
        C: Condition<K>,
    {
        let (_, ready) = self.launch_named(api, object, condition_for).await?;
        Ok(ready)
    }

    /// Launches a run-to-completion workload and, once it has completed, deletes it along with
    /// every pod in its namespace.
    pub async fn run_to_completion<J, P, JA, PA, C>(
        &self,
        jobs: &JA,
        pods: &PA,
        job: &J,
        completed: C,
    ) -> Result<J, LaunchError>
    where
        J: Send + Sync + 'static,
        P: Send + Sync + 'static,
        JA: Resources<J> + Watch<J>,
        PA: Resources<P>,
        C: Condition<J>,
    {
        let (name, done) = self.launch_named(jobs, job, move |_| completed).await?;

        self.calls.call(|| jobs.delete(&name)).await?;
        self.calls.call(|| pods.delete_all()).await?;
        info!(%name, "Completed");
        Ok(done)
    }

    pub async fn delete<K, A>(&self, api: &A, name: &str) -> Result<(), LaunchError>
    where
        K: Send + Sync + 'static,
        A: Resources<K>,
    {
        self.calls.call(|| api.delete(name)).await?;
        Ok(())
    }

    /// Deletes using `policy` in place of the launcher's own.
    pub async fn delete_with<K, A>(
        &self,
        policy: Policy,
        api: &A,
        name: &str,
    ) -> Result<(), LaunchError>
    where
        K: Send + Sync + 'static,
        A: Resources<K>,
    {
        self.calls
            .with_policy(policy)
            .call(|| api.delete(name))
            .await?;
        Ok(())
    }

    async fn launch_named<K, A, F, C>(
        &self,
        api: &A,
        object: &K,
        condition_for: F,
    ) -> Result<(String, K), LaunchError>
    where
        K: Send + Sync + 'static,
        A: Resources<K> + Watch<K>,
        F: FnOnce(&K) -> C,
        C: Condition<K>,
    {
        let created = self.create(api, object).await?;
        let name = api.name(&created).ok_or(LaunchError::Unnamed)?;
        let condition = condition_for(&created);
        debug!(%name, "Created");
        let ready = self.waiter.wait(api, &name, condition).await?;
        Ok((name, ready))
    }
}

// === impl LaunchError ===

impl From<ApiError> for LaunchError {
    fn from(e: ApiError) -> Self {
        Self::Api(e)
    }
}

impl From<WaitError> for LaunchError {
    fn from(e: WaitError) -> Self {
        Self::Wait(e)
    }
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Api(e) => std::fmt::Display::fmt(e, f),
            Self::Ignored => write!(f, "Create failed with an ignored status"),
            Self::Unnamed => write!(f, "Created object has no name"),
            Self::Wait(e) => std::fmt::Display::fmt(e, f),
        }
    }
}

impl std::error::Error for LaunchError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        wait::tests::{applied, Scripted, ScriptedStream},
        Backoff, Status,
    };
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    /// Records every call in a log shared with the watch it serves.
    struct Fake {
        watch: Scripted,
        log: Arc<Mutex<Vec<String>>>,
        label: &'static str,
        create_failures: AtomicUsize,
        delete_failures: AtomicUsize,
    }

    impl Fake {
        fn new(label: &'static str, watch: Scripted) -> Self {
            Self {
                log: watch.log.clone(),
                watch,
                label,
                create_failures: AtomicUsize::new(0),
                delete_failures: AtomicUsize::new(0),
            }
        }

        fn sharing(label: &'static str, other: &Fake) -> Self {
            let watch = Scripted {
                log: other.log.clone(),
                ..Scripted::default()
            };
            Self::new(label, watch)
        }

        fn failing_creates(self, n: usize) -> Self {
            self.create_failures.store(n, Ordering::SeqCst);
            self
        }

        fn failing_deletes(self, n: usize) -> Self {
            self.delete_failures.store(n, Ordering::SeqCst);
            self
        }

        fn record(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        /// Fails with 500 while failures remain.
        fn inject(&self, failures: &AtomicUsize, what: &str) -> Result<(), ApiError> {
            let remaining = failures.load(Ordering::SeqCst);
            if remaining > 0 {
                failures.store(remaining - 1, Ordering::SeqCst);
                self.record(format!("{} failed", what));
                return Err(ApiError::from_status(500, "internal"));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl Resources<&'static str> for Fake {
        async fn create(&self, object: &&'static str) -> Result<&'static str, ApiError> {
            let what = format!("create {}", self.label);
            self.inject(&self.create_failures, &what)?;
            self.record(format!("{} {}", what, object));
            Ok(*object)
        }

        async fn delete(&self, name: &str) -> Result<(), ApiError> {
            let what = format!("delete {}", self.label);
            self.inject(&self.delete_failures, &what)?;
            self.record(format!("{} {}", what, name));
            Ok(())
        }

        async fn delete_all(&self) -> Result<(), ApiError> {
            let what = format!("delete all {}", self.label);
            self.inject(&self.delete_failures, &what)?;
            self.record(what);
            Ok(())
        }

        fn name(&self, object: &&'static str) -> Option<String> {
            Some(object.to_string())
        }
    }

    #[async_trait::async_trait]
    impl Watch<&'static str> for Fake {
        type Notifications = ScriptedStream;

        async fn open(&self, name: &str) -> Result<ScriptedStream, ApiError> {
            self.watch.open(name).await
        }
    }

    fn log(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|e| e.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn job_cleanup_follows_completion() {
        let jobs = Fake::new(
            "job",
            Scripted::default().stream(vec![applied("active"), applied("succeeded")], false),
        )
        .failing_deletes(1);
        let pods = Fake::sharing("pods", &jobs).failing_deletes(1);

        let done = Launcher::default()
            .run_to_completion(&jobs, &pods, &"mypod", |s: &&'static str| *s == "succeeded")
            .await
            .unwrap();
        assert_eq!(done, "succeeded");
        assert_eq!(
            jobs.log(),
            log(&[
                "create job mypod",
                "open mypod",
                "notify active",
                "notify succeeded",
                "close",
                "delete job failed",
                "delete job mypod",
                "delete all pods failed",
                "delete all pods",
            ])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_errors_propagate() {
        let jobs = Fake::new(
            "job",
            Scripted::default().stream(vec![applied("succeeded")], false),
        );
        let pods = Fake::sharing("pods", &jobs).failing_deletes(usize::MAX);
        let launcher = Launcher::new(
            Executor::new(Policy::default(), Backoff::default().with_attempts(Some(2))),
            Waiter::default(),
        );

        let err = launcher
            .run_to_completion(&jobs, &pods, &"mypod", |s: &&'static str| *s == "succeeded")
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Api(e) if e.status() == Some(500)));
    }

    #[tokio::test(start_paused = true)]
    async fn launch_retries_create_and_waits() {
        let api = Fake::new(
            "deployment",
            Scripted::default().stream(vec![applied("0/1"), applied("1/1")], false),
        )
        .failing_creates(2);

        let ready = Launcher::default()
            .launch(&api, &"mypod-deployment", |created: &&'static str| {
                assert_eq!(*created, "mypod-deployment");
                |s: &&'static str| *s == "1/1"
            })
            .await
            .unwrap();
        assert_eq!(ready, "1/1");
        assert_eq!(
            api.log(),
            log(&[
                "create deployment failed",
                "create deployment failed",
                "create deployment mypod-deployment",
                "open mypod-deployment",
                "notify 0/1",
                "notify 1/1",
                "close",
            ])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ignored_create_has_nothing_to_wait_on() {
        let api = Fake::new("pod", Scripted::default()).failing_creates(1);
        let launcher = Launcher::new(
            Executor::new(Policy::empty().ignore(500), Backoff::default()),
            Waiter::default(),
        );
        let err = launcher
            .launch(&api, &"mypod", |_: &&'static str| |_: &&'static str| true)
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Ignored));
        assert_eq!(api.watch.opens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_with_ignores_missing() {
        let api = Fake::new("pvc", Scripted::default());
        // The fake only fails with 500; ignoring it stands in for a 404.
        let api = api.failing_deletes(1);
        let launcher = Launcher::new(
            Executor::new(Policy::empty(), Backoff::default()),
            Waiter::default(),
        );
        launcher
            .delete_with(Policy::empty().ignore(500), &api, "mypvc")
            .await
            .unwrap();
        assert_eq!(api.log(), log(&["delete pvc failed"]));

        let err = launcher.delete(&api.failing_deletes(1), "mypvc").await;
        assert!(err.is_err());
    }
}
