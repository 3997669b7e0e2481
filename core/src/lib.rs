#![deny(rust_2018_idioms)]

pub mod call;
mod duration;
pub mod launch;
pub mod wait;

pub use self::{
    call::{Action, ApiError, Backoff, Executor, InvalidPolicy, Policy, Status},
    duration::{parse_duration, InvalidDuration},
    launch::{LaunchError, Launcher},
    wait::{Condition, Notification, Notifications, WaitError, Waiter, Watch},
};

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The request/response half of a cluster API, scoped to one resource kind.
#[async_trait::async_trait]
pub trait Resources<K: Send + Sync + 'static>: Send + Sync {
    async fn create(&self, object: &K) -> Result<K, ApiError>;

    async fn delete(&self, name: &str) -> Result<(), ApiError>;

    /// Deletes every object of this kind in scope.
    async fn delete_all(&self) -> Result<(), ApiError>;

    fn name(&self, object: &K) -> Option<String>;
}
