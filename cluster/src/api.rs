use attach_bench_core::{ApiError, Notification, Notifications, Resources, Watch};
use futures::{stream::BoxStream, StreamExt};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    runtime::{watcher, WatchStreamExt},
    Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{collections::VecDeque, fmt::Debug};
use tracing::{debug, trace};

/// A `kube::Api` handle for one resource kind.
#[derive(Clone)]
pub struct Cluster<K> {
    api: Api<K>,
}

/// Notifications for a single named object, fed by a `kube` watcher.
pub struct ClusterStream<K> {
    name: String,
    events: BoxStream<'static, Result<watcher::Event<K>, watcher::Error>>,
    pending: VecDeque<K>,
}

// === impl Cluster ===

impl<K> Cluster<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    pub fn namespaced(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

impl<K> Cluster<K>
where
    K: Resource,
    K::DynamicType: Default,
{
    pub fn all(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait::async_trait]
impl<K> Resources<K> for Cluster<K>
where
    K: Resource + Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static,
{
    async fn create(&self, object: &K) -> Result<K, ApiError> {
        self.api
            .create(&PostParams::default(), object)
            .await
            .map_err(api_error)
    }

    async fn delete(&self, name: &str) -> Result<(), ApiError> {
        self.api
            .delete(name, &DeleteParams::default())
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), ApiError> {
        self.api
            .delete_collection(&DeleteParams::default(), &ListParams::default())
            .await
            .map_err(api_error)?;
        Ok(())
    }

    fn name(&self, object: &K) -> Option<String> {
        object.meta().name.clone()
    }
}

#[async_trait::async_trait]
impl<K> Watch<K> for Cluster<K>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    type Notifications = ClusterStream<K>;

    async fn open(&self, name: &str) -> Result<ClusterStream<K>, ApiError> {
        let config = watcher::Config::default().fields(&format!("metadata.name={}", name));
        let events = watcher(self.api.clone(), config).default_backoff().boxed();
        debug!(%name, "Opened watch");
        Ok(ClusterStream {
            name: name.to_string(),
            events,
            pending: VecDeque::new(),
        })
    }
}

// === impl ClusterStream ===

#[async_trait::async_trait]
impl<K: Send + 'static> Notifications<K> for ClusterStream<K> {
    async fn next(&mut self) -> Option<Result<Notification<K>, ApiError>> {
        loop {
            if let Some(object) = self.pending.pop_front() {
                return Some(Ok(Notification::Applied(object)));
            }

            match self.events.next().await? {
                Ok(watcher::Event::Applied(object)) => {
                    return Some(Ok(Notification::Applied(object)))
                }
                Ok(watcher::Event::Deleted(object)) => {
                    return Some(Ok(Notification::Deleted(object)))
                }
                // A relist replays the current state of every matching object.
                Ok(watcher::Event::Restarted(objects)) => {
                    trace!(name = %self.name, objects = objects.len(), "Watch restarted");
                    self.pending.extend(objects);
                }
                Err(error) => return Some(Err(watch_error(error))),
            }
        }
    }

    async fn close(self) {
        let Self { name, events, .. } = self;
        drop(events);
        debug!(%name, "Closed watch");
    }
}

// === errors ===

pub(crate) fn api_error(error: kube::Error) -> ApiError {
    let code = status_of(&error);
    ApiError::new(code, error)
}

fn status_of(error: &kube::Error) -> Option<u16> {
    match error {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    }
}

fn watch_error(error: watcher::Error) -> ApiError {
    let code = match &error {
        watcher::Error::WatchError(response) => Some(response.code),
        watcher::Error::InitialListFailed(e)
        | watcher::Error::WatchStartFailed(e)
        | watcher::Error::WatchFailed(e) => status_of(e),
        #[allow(unreachable_patterns)]
        _ => None,
    };
    ApiError::new(code, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use attach_bench_core::Status;
    use kube::core::ErrorResponse;

    fn response(code: u16) -> ErrorResponse {
        ErrorResponse {
            status: "Failure".to_string(),
            message: "injected".to_string(),
            reason: "Injected".to_string(),
            code,
        }
    }

    #[test]
    fn api_errors_keep_status() {
        let err = api_error(kube::Error::Api(response(500)));
        assert_eq!(err.status(), Some(500));

        let err = watch_error(watcher::Error::WatchError(response(410)));
        assert_eq!(err.status(), Some(410));

        let err = watch_error(watcher::Error::WatchFailed(kube::Error::Api(response(403))));
        assert_eq!(err.status(), Some(403));

        let err = watch_error(watcher::Error::NoResourceVersion);
        assert_eq!(err.status(), None);
    }
}
