// Client creation with custom user-agent support for kube 2.x
use super::cache::config::WATCH_TIMEOUT_SECONDS;
use super::remote::{Notification, NotificationStream, Payload, RawObject, RemoteResourceClient};
use crate::domain::{ObjectKey, Resource, ResourceKind};
use crate::error::{Error, Result as KmResult};
use async_trait::async_trait;
use futures::{StreamExt, future};
use hyper::http::{HeaderName, HeaderValue};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use k8s_openapi::serde_json::{Value, json};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ApiResource, DynamicObject, ListParams, Patch, PatchParams, WatchEvent, WatchParams};
use kube::{Client, Config};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Field manager name used for server-side apply
pub const FIELD_MANAGER: &str = "kubemirror";

/// Push a `user-agent` header onto `config`; an invalid value keeps the default agent
pub fn add_user_agent_header(config: &mut Config, custom_user_agent: Option<&str>) {
    if let Some(user_agent) = custom_user_agent {
        match HeaderValue::from_str(user_agent) {
            Ok(header_value) => config
                .headers
                .push((HeaderName::from_static("user-agent"), header_value)),
            Err(e) => warn!("Ignoring invalid user-agent {:?}: {}", user_agent, e),
        }
    }
}

/// Create a new k8s client to interact with k8s cluster api
///
/// # Errors
///
/// Will return `Err` if the kube config cannot be inferred or the client cannot be built
pub async fn new(custom_user_agent: Option<&str>) -> KmResult<Client> {
    let mut config = Config::infer().await?;
    add_user_agent_header(&mut config, custom_user_agent);
    Ok(Client::try_from(config)?)
}

/// `RemoteResourceClient` backed by the kube API
pub struct KubeResourceClient {
    client: OnceCell<Client>,
    user_agent: Option<String>,
}

impl Default for KubeResourceClient {
    fn default() -> Self {
        Self::new(Some(super::USER_AGENT))
    }
}

impl KubeResourceClient {
    /// A client that connects lazily on `connect`
    #[must_use]
    pub fn new(user_agent: Option<&str>) -> Self {
        Self {
            client: OnceCell::new(),
            user_agent: user_agent.map(str::to_string),
        }
    }

    /// Wrap an already constructed kube client
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self {
            client: OnceCell::from(client),
            user_agent: None,
        }
    }

    fn client(&self) -> KmResult<Client> {
        self.client.get().cloned().ok_or(Error::NotConnected)
    }
}

fn api<K>(client: Client, namespace: &str) -> Api<K>
where
    K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    if namespace.is_empty() {
        Api::all(client)
    } else {
        Api::namespaced(client, namespace)
    }
}

async fn list_typed<K>(client: Client, namespace: &str, wrap: fn(K) -> RawObject) -> KmResult<Vec<RawObject>>
where
    K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    let list = api::<K>(client, namespace).list(&ListParams::default()).await?;
    Ok(list.items.into_iter().map(wrap).collect())
}

async fn get_typed<K>(client: Client, namespace: &str, name: &str, wrap: fn(K) -> RawObject) -> KmResult<Option<RawObject>>
where
    K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    Ok(api::<K>(client, namespace).get_opt(name).await?.map(wrap))
}

async fn watch_typed<K>(client: Client, namespace: &str, wrap: fn(K) -> RawObject) -> KmResult<NotificationStream>
where
    K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + 'static,
{
    let wp = WatchParams::default().timeout(WATCH_TIMEOUT_SECONDS);
    // An empty version starts at the most recent state: every live object
    // arrives first as a synthetic `Added`, then changes follow.
    let stream = api::<K>(client, namespace).watch(&wp, "").await?;

    Ok(stream
        .filter_map(move |event| {
            future::ready(match event {
                Ok(WatchEvent::Added(obj)) => Some(Ok(Notification::Added(wrap(obj)))),
                Ok(WatchEvent::Modified(obj)) => Some(Ok(Notification::Modified(wrap(obj)))),
                Ok(WatchEvent::Deleted(obj)) => {
                    Some(Ok(Notification::Deleted(Payload::Value(wrap(obj)))))
                }
                Ok(WatchEvent::Bookmark(_)) => None,
                Ok(WatchEvent::Error(e)) => Some(Err(Error::Connection(format!("watch error: {e:?}")))),
                Err(e) => Some(Err(Error::Kube(e))),
            })
        })
        .boxed())
}

fn api_resource(kind: ResourceKind) -> KmResult<ApiResource> {
    match kind {
        ResourceKind::Pod => Ok(ApiResource::erase::<Pod>(&())),
        ResourceKind::Service => Ok(ApiResource::erase::<Service>(&())),
        ResourceKind::Deployment => Ok(ApiResource::erase::<Deployment>(&())),
        ResourceKind::ConfigMap => Ok(ApiResource::erase::<ConfigMap>(&())),
        ResourceKind::Unknown => Err(Error::UnsupportedKind(kind.to_string())),
    }
}

/// Build a server-side apply body from a desired `Resource`
fn apply_body(resource: &Resource, ar: &ApiResource) -> Value {
    let mut body = match &resource.data {
        Value::Object(map) => Value::Object(map.clone()),
        _ => json!({}),
    };
    body["apiVersion"] = Value::String(ar.api_version.clone());
    body["kind"] = Value::String(ar.kind.clone());
    body["metadata"]["name"] = Value::String(resource.name.clone());
    body["metadata"]["namespace"] = Value::String(resource.namespace.clone());
    body["metadata"]["labels"] = json!(resource.labels);
    if let Some(meta) = body["metadata"].as_object_mut() {
        meta.remove("resourceVersion");
        meta.remove("managedFields");
    }
    body
}

#[async_trait]
impl RemoteResourceClient for KubeResourceClient {
    async fn connect(&self) -> KmResult<()> {
        info!("Connecting to Kubernetes cluster");
        self.client
            .get_or_try_init(|| new(self.user_agent.as_deref()))
            .await?;
        info!("Successfully connected to Kubernetes cluster");
        Ok(())
    }

    async fn list(&self, kind: ResourceKind, namespace: &str) -> KmResult<Vec<RawObject>> {
        let client = self.client()?;
        debug!(%kind, namespace, "Listing from API");
        match kind {
            ResourceKind::Pod => list_typed::<Pod>(client, namespace, RawObject::Pod).await,
            ResourceKind::Service => list_typed::<Service>(client, namespace, RawObject::Service).await,
            ResourceKind::Deployment => {
                list_typed::<Deployment>(client, namespace, RawObject::Deployment).await
            }
            ResourceKind::ConfigMap => {
                list_typed::<ConfigMap>(client, namespace, RawObject::ConfigMap).await
            }
            ResourceKind::Unknown => Err(Error::UnsupportedKind(kind.to_string())),
        }
    }

    async fn get(&self, kind: ResourceKind, name: &str, namespace: &str) -> KmResult<RawObject> {
        let client = self.client()?;
        let found = match kind {
            ResourceKind::Pod => get_typed::<Pod>(client, namespace, name, RawObject::Pod).await?,
            ResourceKind::Service => {
                get_typed::<Service>(client, namespace, name, RawObject::Service).await?
            }
            ResourceKind::Deployment => {
                get_typed::<Deployment>(client, namespace, name, RawObject::Deployment).await?
            }
            ResourceKind::ConfigMap => {
                get_typed::<ConfigMap>(client, namespace, name, RawObject::ConfigMap).await?
            }
            ResourceKind::Unknown => return Err(Error::UnsupportedKind(kind.to_string())),
        };
        found.ok_or_else(|| Error::NotFound(ObjectKey::new(kind, namespace, name)))
    }

    async fn apply(&self, resource: &Resource) -> KmResult<()> {
        let client = self.client()?;
        let ar = api_resource(resource.kind)?;
        debug!(kind = %resource.kind, name = %resource.name, namespace = %resource.namespace, "Applying resource");

        let api: Api<DynamicObject> = Api::namespaced_with(client, &resource.namespace, &ar);
        let body = apply_body(resource, &ar);
        api.patch(&resource.name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&body))
            .await?;
        Ok(())
    }

    async fn subscribe(&self, kind: ResourceKind, namespace: &str) -> KmResult<NotificationStream> {
        let client = self.client()?;
        match kind {
            ResourceKind::Pod => watch_typed::<Pod>(client, namespace, RawObject::Pod).await,
            ResourceKind::Service => watch_typed::<Service>(client, namespace, RawObject::Service).await,
            ResourceKind::Deployment => {
                watch_typed::<Deployment>(client, namespace, RawObject::Deployment).await
            }
            ResourceKind::ConfigMap => {
                watch_typed::<ConfigMap>(client, namespace, RawObject::ConfigMap).await
            }
            ResourceKind::Unknown => Err(Error::UnsupportedKind(kind.to_string())),
        }
    }
}
