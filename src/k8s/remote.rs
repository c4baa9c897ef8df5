/**
 * Contract consumed from the remote cluster API.
 *
 * The cache, the reconciler and the read path only ever talk to the cluster
 * through `RemoteResourceClient`, so tests can substitute an in-memory client.
 */
use crate::domain::{self, Resource, ResourceKind};
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::serde_json::{self, Value};
use kube::api::DynamicObject;

/// An object exactly as the remote API returned it
#[derive(Debug, Clone)]
pub enum RawObject {
    Pod(Pod),
    Service(Service),
    Deployment(Deployment),
    ConfigMap(ConfigMap),
    /// Untyped object; `types` may carry explicit kind information
    Dynamic(DynamicObject),
}

impl RawObject {
    #[must_use]
    pub const fn meta(&self) -> &ObjectMeta {
        match self {
            Self::Pod(o) => &o.metadata,
            Self::Service(o) => &o.metadata,
            Self::Deployment(o) => &o.metadata,
            Self::ConfigMap(o) => &o.metadata,
            Self::Dynamic(o) => &o.metadata,
        }
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.meta().name.as_deref().filter(|n| !n.is_empty())
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.meta().namespace.as_deref()
    }

    #[must_use]
    pub fn resource_version(&self) -> Option<&str> {
        self.meta().resource_version.as_deref()
    }

    /// Kind named by the object's own type information, if it carries any
    #[must_use]
    pub fn explicit_kind(&self) -> Option<&str> {
        match self {
            Self::Dynamic(o) => o.types.as_ref().map(|t| t.kind.as_str()).filter(|k| !k.is_empty()),
            _ => None,
        }
    }

    /// Static type -> kind lookup
    #[must_use]
    pub const fn type_kind(&self) -> ResourceKind {
        match self {
            Self::Pod(_) => ResourceKind::Pod,
            Self::Service(_) => ResourceKind::Service,
            Self::Deployment(_) => ResourceKind::Deployment,
            Self::ConfigMap(_) => ResourceKind::ConfigMap,
            Self::Dynamic(_) => ResourceKind::Unknown,
        }
    }

    #[must_use]
    pub fn api_version(&self) -> String {
        use k8s_openapi::Resource as _;
        match self {
            Self::Pod(_) => Pod::API_VERSION.to_string(),
            Self::Service(_) => Service::API_VERSION.to_string(),
            Self::Deployment(_) => Deployment::API_VERSION.to_string(),
            Self::ConfigMap(_) => ConfigMap::API_VERSION.to_string(),
            Self::Dynamic(o) => o.types.as_ref().map(|t| t.api_version.clone()).unwrap_or_default(),
        }
    }

    /// The object serialized as JSON, `Null` if it cannot be
    #[must_use]
    pub fn to_data(&self) -> Value {
        let value = match self {
            Self::Pod(o) => serde_json::to_value(o),
            Self::Service(o) => serde_json::to_value(o),
            Self::Deployment(o) => serde_json::to_value(o),
            Self::ConfigMap(o) => serde_json::to_value(o),
            Self::Dynamic(o) => serde_json::to_value(o),
        };
        value.unwrap_or_default()
    }

    /// Read the object as a domain `Deployment`, decoding untyped objects from JSON
    ///
    /// # Errors
    ///
    /// Returns an error if an untyped object does not decode as a deployment
    pub fn to_deployment(&self) -> Result<domain::Deployment> {
        match self {
            Self::Deployment(d) => Ok(domain::Deployment::from(d)),
            other => {
                let dep: Deployment = serde_json::from_value(other.to_data())?;
                Ok(domain::Deployment::from(&dep))
            }
        }
    }
}

/// Deletion notifications for an object whose final state was never observed
#[derive(Debug, Clone)]
pub struct Tombstone {
    /// `namespace/name` of the deleted object
    pub key: String,
    pub last_known: Option<RawObject>,
}

impl Tombstone {
    #[must_use]
    pub fn new(namespace: &str, name: &str, last_known: Option<RawObject>) -> Self {
        Self {
            key: format!("{namespace}/{name}"),
            last_known,
        }
    }

    /// Split `key` into namespace and name; a key without a `/` is a bare name
    #[must_use]
    pub fn split_key(&self) -> (&str, &str) {
        self.key.split_once('/').unwrap_or(("", self.key.as_str()))
    }
}

/// Either a live object or a tombstone wrapping its last known value
#[derive(Debug, Clone)]
pub enum Payload {
    Value(RawObject),
    Tombstone(Tombstone),
}

impl Payload {
    #[must_use]
    pub const fn last_known(&self) -> Option<&RawObject> {
        match self {
            Self::Value(obj) => Some(obj),
            Self::Tombstone(t) => t.last_known.as_ref(),
        }
    }

    /// Best available object name, falling back to the tombstone key
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Value(obj) => obj.name(),
            Self::Tombstone(t) => t
                .last_known
                .as_ref()
                .and_then(RawObject::name)
                .or_else(|| Some(t.split_key().1).filter(|n| !n.is_empty())),
        }
    }
}

/// Raw change notification from a subscription
#[derive(Debug, Clone)]
pub enum Notification {
    Added(RawObject),
    Modified(RawObject),
    Deleted(Payload),
}

pub type NotificationStream = BoxStream<'static, Result<Notification>>;

#[async_trait]
pub trait RemoteResourceClient: Send + Sync {
    /// Establish the connection; other calls fail with `NotConnected` before this
    async fn connect(&self) -> Result<()>;

    async fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<RawObject>>;

    /// Fetch one object; a missing object is `Error::NotFound`
    async fn get(&self, kind: ResourceKind, name: &str, namespace: &str) -> Result<RawObject>;

    /// Forward a desired state upstream
    async fn apply(&self, resource: &Resource) -> Result<()>;

    /// Subscribe to add/update/delete notifications for one (namespace, kind)
    async fn subscribe(&self, kind: ResourceKind, namespace: &str) -> Result<NotificationStream>;
}
