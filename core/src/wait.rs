//! Blocks until a watched object satisfies a condition.

use crate::{ApiError, Status};
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// A change to a single watched object, carrying its latest snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification<K> {
    Applied(K),
    Deleted(K),
}

/// Opens change-notification streams filtered to a single object name.
#[async_trait::async_trait]
pub trait Watch<K: Send + 'static>: Send + Sync {
    type Notifications: Notifications<K>;

    async fn open(&self, name: &str) -> Result<Self::Notifications, ApiError>;
}

#[async_trait::async_trait]
pub trait Notifications<K: Send + 'static>: Send {
    /// Returns `None` when the server ends the stream.
    async fn next(&mut self) -> Option<Result<Notification<K>, ApiError>>;

    async fn close(self);
}

pub trait Condition<K> {
    fn is_satisfied(&self, object: &K) -> bool;
}

#[derive(Clone, Debug, Default)]
pub struct Waiter {
    deadline: Option<Duration>,
    cancel: CancellationToken,
}

#[derive(Debug)]
pub enum WaitError {
    DeadlineExceeded(Duration),
    Cancelled,
    Open(ApiError),
    Watch(ApiError),
}

/// Delay before reopening a stream the server ended. It doubles while streams keep ending without
/// delivering anything.
const REOPEN_DELAY: Duration = Duration::from_millis(100);
const MAX_REOPEN_DELAY: Duration = Duration::from_secs(10);

enum Step<T> {
    Cancelled,
    Expired,
    Next(T),
}

// === impl Waiter ===

impl Waiter {
    pub fn new(deadline: Option<Duration>) -> Self {
        Self {
            deadline,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(self, cancel: CancellationToken) -> Self {
        Self { cancel, ..self }
    }

    /// Watches the object named `name` until a notification satisfies `condition`, returning that
    /// snapshot.
    ///
    /// The condition is evaluated exactly once per notification, in delivery order. The stream is
    /// closed before returning, whether the wait succeeded, expired or was cancelled. Streams that
    /// the server ends are reopened.
    pub async fn wait<K, W, C>(&self, watch: &W, name: &str, condition: C) -> Result<K, WaitError>
    where
        K: Send + 'static,
        W: Watch<K>,
        C: Condition<K>,
    {
        // A deadline too far away to represent never expires.
        let expiry = self.deadline.and_then(|d| time::Instant::now().checked_add(d));
        let expired = async move {
            match expiry {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expired);

        let mut stream = watch.open(name).await.map_err(WaitError::Open)?;
        debug!(%name, deadline = ?self.deadline, "Watching");

        let mut reopen = REOPEN_DELAY;
        let res = loop {
            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Cancelled,
                _ = &mut expired => Step::Expired,
                next = stream.next() => Step::Next(next),
            };

            match step {
                Step::Cancelled => break Err(WaitError::Cancelled),
                Step::Expired => break Err(self.expired()),
                Step::Next(Some(Ok(notification))) => {
                    reopen = REOPEN_DELAY;
                    let satisfied = condition.is_satisfied(notification.object());
                    trace!(%name, satisfied, "Notified");
                    if satisfied {
                        break Ok(notification.into_object());
                    }
                }
                Step::Next(Some(Err(error))) => {
                    if is_fatal(&error) {
                        break Err(WaitError::Watch(error));
                    }
                    warn!(%name, %error, "Watch failed");
                }
                Step::Next(None) => {
                    debug!(%name, delay = ?reopen, "Watch ended; reopening");
                    stream.close().await;
                    let reopened = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => Step::Cancelled,
                        _ = &mut expired => Step::Expired,
                        res = async {
                            time::sleep(reopen).await;
                            watch.open(name).await
                        } => Step::Next(res),
                    };
                    reopen = (reopen * 2).min(MAX_REOPEN_DELAY);
                    // The ended stream is already closed on these paths.
                    match reopened {
                        Step::Cancelled => return Err(WaitError::Cancelled),
                        Step::Expired => return Err(self.expired()),
                        Step::Next(res) => stream = res.map_err(WaitError::Open)?,
                    }
                }
            }
        };

        stream.close().await;
        res
    }

    fn expired(&self) -> WaitError {
        WaitError::DeadlineExceeded(self.deadline.unwrap_or_default())
    }
}

/// Client errors mean the watch can never succeed, except for an expired resource version (410)
/// and throttling (429).
fn is_fatal(error: &ApiError) -> bool {
    matches!(error.status(), Some(code) if (400..500).contains(&code) && code != 410 && code != 429)
}

// === impl Notification ===

impl<K> Notification<K> {
    pub fn object(&self) -> &K {
        match self {
            Self::Applied(k) | Self::Deleted(k) => k,
        }
    }

    pub fn into_object(self) -> K {
        match self {
            Self::Applied(k) | Self::Deleted(k) => k,
        }
    }
}

// === impl Condition ===

impl<K, F: Fn(&K) -> bool> Condition<K> for F {
    fn is_satisfied(&self, object: &K) -> bool {
        (self)(object)
    }
}

// === impl WaitError ===

impl std::fmt::Display for WaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeadlineExceeded(d) => write!(f, "Condition not met within {:?}", d),
            Self::Cancelled => write!(f, "Wait cancelled"),
            Self::Open(e) => write!(f, "Failed to open watch: {}", e),
            Self::Watch(e) => write!(f, "Watch failed: {}", e),
        }
    }
}

impl std::error::Error for WaitError {}
