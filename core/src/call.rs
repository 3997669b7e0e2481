//! Invokes remote operations, retrying or ignoring failures according to their status code.

use crate::Error;
use indexmap::IndexMap;
use rand::Rng;
use std::{future::Future, str::FromStr};
use tokio::time::{self, Duration};
use tracing::{debug, warn};

/// Exposes the numeric status code carried by a failed call, if any.
pub trait Status {
    fn status(&self) -> Option<u16>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Retry,
    Ignore,
}

/// Maps failure status codes to actions. Codes without an entry are propagated to the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy(IndexMap<u16, Action>);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    factor: u32,
    jitter: bool,
    attempts: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct Executor {
    policy: Policy,
    backoff: Backoff,
}

#[derive(Debug)]
pub struct ApiError {
    code: Option<u16>,
    inner: Error,
}

#[derive(Debug)]
pub enum InvalidPolicy {
    InvalidStatus,
    InvalidAction,
}

// === impl Executor ===

impl Executor {
    pub fn new(policy: Policy, backoff: Backoff) -> Self {
        Self { policy, backoff }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Returns an executor with the same backoff and a different policy.
    pub fn with_policy(&self, policy: Policy) -> Self {
        Self {
            policy,
            backoff: self.backoff,
        }
    }

    /// Invokes `op` until it succeeds or fails in a way the policy does not retry.
    ///
    /// An ignored failure yields `Ok(None)`. Failures without a status code, or with a code the
    /// policy does not name, are returned after a single attempt. When the backoff's attempt
    /// limit is reached the last error is returned.
    pub async fn call<T, E, F, Fut>(&self, mut op: F) -> Result<Option<T>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Status + std::fmt::Display,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let error = match op().await {
                Ok(value) => return Ok(Some(value)),
                Err(error) => error,
            };

            let code = match error.status() {
                Some(code) => code,
                None => return Err(error),
            };
            match self.policy.action(code) {
                None => return Err(error),
                Some(Action::Ignore) => {
                    debug!(code, %error, "Ignoring failure");
                    return Ok(None);
                }
                Some(Action::Retry) => {
                    if self.backoff.exhausted(attempts) {
                        warn!(code, attempts, %error, "Giving up");
                        return Err(error);
                    }
                    let delay = self.backoff.delay(attempts);
                    debug!(code, attempts, ?delay, %error, "Retrying");
                    time::sleep(delay).await;
                }
            }
        }
    }
}

// === impl Policy ===

impl Default for Policy {
    fn default() -> Self {
        Self::empty().retry(500)
    }
}

impl Policy {
    pub fn empty() -> Self {
        Self(IndexMap::new())
    }

    pub fn retry(mut self, code: u16) -> Self {
        self.0.insert(code, Action::Retry);
        self
    }

    pub fn ignore(mut self, code: u16) -> Self {
        self.0.insert(code, Action::Ignore);
        self
    }

    pub fn action(&self, code: u16) -> Option<Action> {
        self.0.get(&code).copied()
    }
}

impl FromStr for Policy {
    type Err = InvalidPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut policy = Self::empty();
        if s.trim().is_empty() {
            return Ok(policy);
        }

        for entry in s.split(',') {
            let mut kv = entry.splitn(2, '=');
            match (kv.next(), kv.next()) {
                (Some(code), Some(action)) => {
                    let code = code
                        .trim()
                        .parse::<u16>()
                        .map_err(|_| InvalidPolicy::InvalidStatus)?;
                    policy.0.insert(code, action.parse()?);
                }
                _ => return Err(InvalidPolicy::InvalidStatus),
            }
        }
        Ok(policy)
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (code, action) in self.0.iter() {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}={}", code, action)?;
            first = false;
        }
        Ok(())
    }
}

// === impl Action ===

impl FromStr for Action {
    type Err = InvalidPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(Action::Retry),
            "ignore" => Ok(Action::Ignore),
            _ => Err(InvalidPolicy::InvalidAction),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Retry => write!(f, "retry"),
            Action::Ignore => write!(f, "ignore"),
        }
    }
}

// === impl Backoff ===

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1), Duration::from_secs(30))
    }
}

impl Backoff {
    /// Doubles the delay after each failure, up to `max`, with jitter and at most 10 attempts.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            factor: 2,
            jitter: true,
            attempts: Some(10),
        }
    }

    /// Waits `delay` between attempts and never gives up.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            max: delay,
            factor: 1,
            jitter: false,
            attempts: None,
        }
    }

    /// Caps the total number of invocations. `None` retries forever.
    pub fn with_attempts(self, attempts: Option<usize>) -> Self {
        Self {
            attempts: attempts.map(|n| n.max(1)),
            ..self
        }
    }

    pub fn without_jitter(self) -> Self {
        Self {
            jitter: false,
            ..self
        }
    }

    fn exhausted(&self, attempts: usize) -> bool {
        matches!(self.attempts, Some(max) if attempts >= max)
    }

    /// The delay after `failures` consecutive failures.
    fn delay(&self, failures: usize) -> Duration {
        let exp = failures.saturating_sub(1).min(32) as u32;
        let base = self
            .initial
            .saturating_mul(self.factor.saturating_pow(exp))
            .min(self.max);
        if !self.jitter {
            return base;
        }

        // Jittered delays fall between half the base delay and the full base delay.
        let half = base / 2;
        half + rand::thread_rng().gen_range(Duration::ZERO..=half)
    }
}

// === impl ApiError ===

impl ApiError {
    pub fn new(code: Option<u16>, inner: impl Into<Error>) -> Self {
        Self {
            code,
            inner: inner.into(),
        }
    }

    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        Self::new(Some(code), message.into())
    }
}

impl Status for ApiError {
    fn status(&self) -> Option<u16> {
        self.code
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (status {})", self.inner, code),
            None => std::fmt::Display::fmt(&self.inner, f),
        }
    }
}

impl std::error::Error for ApiError {}

// === impl InvalidPolicy ===

impl std::fmt::Display for InvalidPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidStatus => write!(f, "Invalid status code"),
            Self::InvalidAction => write!(f, "Invalid action; expected 'retry' or 'ignore'"),
        }
    }
}

impl std::error::Error for InvalidPolicy {}
