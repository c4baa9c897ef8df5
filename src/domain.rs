//! Internal representation of mirrored cluster objects.
//!
//! Everything the cache hands to business logic or the read path is expressed
//! in these types, independent of the wire shape the remote API used.

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment as K8sDeployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::serde_json::{self, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Text layout used for creation timestamps on the read path
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Closed set of kinds the mirror understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ResourceKind {
    Pod,
    Service,
    Deployment,
    ConfigMap,
    Unknown,
}

impl ResourceKind {
    /// Kinds that can be listed and watched
    pub const WATCHABLE: [Self; 4] = [Self::Pod, Self::Service, Self::Deployment, Self::ConfigMap];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pod => "Pod",
            Self::Service => "Service",
            Self::Deployment => "Deployment",
            Self::ConfigMap => "ConfigMap",
            Self::Unknown => "Unknown",
        }
    }

    /// Resolve a `Kind` string as carried in an object's type information
    #[must_use]
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "Pod" => Self::Pod,
            "Service" => Self::Service,
            "Deployment" => Self::Deployment,
            "ConfigMap" => Self::ConfigMap,
            _ => Self::Unknown,
        }
    }

    /// Resolve a configured resource name (`deployments`, `deployment`, `Deployment`)
    #[must_use]
    pub fn from_resource_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "pods" | "pod" => Some(Self::Pod),
            "services" | "service" | "svc" => Some(Self::Service),
            "deployments" | "deployment" | "deploy" => Some(Self::Deployment),
            "configmaps" | "configmap" | "cm" => Some(Self::ConfigMap),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a cached object: namespace + kind + name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub kind: ResourceKind,
    pub name: String,
}

impl ObjectKey {
    #[must_use]
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: String,
    pub api_version: String,
    pub labels: BTreeMap<String, String>,
    /// Opaque payload: the object as JSON
    pub data: Value,
}

impl Resource {
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.kind, self.namespace.clone(), self.name.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("CREATED"),
            Self::Updated => f.write_str("UPDATED"),
            Self::Deleted => f.write_str("DELETED"),
        }
    }
}

/// A change notification with the snapshot captured when it was observed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceEvent {
    pub event_type: EventType,
    pub resource: Resource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
    pub ready_replicas: i32,
    pub updated_replicas: i32,
    pub available_replicas: i32,
    pub unavailable_replicas: i32,
    pub labels: BTreeMap<String, String>,
    pub creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RolloutPhase {
    Available,
    Progressing,
    Unavailable,
    ScaledDown,
}

/// Aggregate view over a deployment's replica counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentStatus {
    pub ready_replicas: i32,
    pub available_replicas: i32,
    pub unavailable_replicas: i32,
    pub phase: RolloutPhase,
}

impl Deployment {
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(ResourceKind::Deployment, self.namespace.clone(), self.name.clone())
    }

    #[must_use]
    pub const fn status(&self) -> DeploymentStatus {
        let phase = if self.replicas == 0 {
            RolloutPhase::ScaledDown
        } else if self.available_replicas >= self.replicas && self.updated_replicas >= self.replicas
        {
            RolloutPhase::Available
        } else if self.available_replicas == 0 {
            RolloutPhase::Unavailable
        } else {
            RolloutPhase::Progressing
        };

        DeploymentStatus {
            ready_replicas: self.ready_replicas,
            available_replicas: self.available_replicas,
            unavailable_replicas: self.unavailable_replicas,
            phase,
        }
    }

    /// Creation time as `YYYY-MM-DD HH:MM:SS`, empty when unknown
    #[must_use]
    pub fn creation_timestamp_text(&self) -> String {
        self.creation_timestamp
            .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_default()
    }
}

// Goes through the serialized RFC 3339 form so the conversion does not depend
// on which datetime crate backs `Time`.
fn parse_time(time: &Time) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(time).ok()?;
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

impl From<&K8sDeployment> for Deployment {
    fn from(dep: &K8sDeployment) -> Self {
        let status = dep.status.as_ref();
        Self {
            name: dep.metadata.name.clone().unwrap_or_default(),
            namespace: dep.metadata.namespace.clone().unwrap_or_default(),
            // apiserver defaults an omitted replica count to 1
            replicas: dep.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
            ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            updated_replicas: status.and_then(|s| s.updated_replicas).unwrap_or(0),
            available_replicas: status.and_then(|s| s.available_replicas).unwrap_or(0),
            unavailable_replicas: status.and_then(|s| s.unavailable_replicas).unwrap_or(0),
            labels: dep.metadata.labels.clone().unwrap_or_default(),
            creation_timestamp: dep.metadata.creation_timestamp.as_ref().and_then(parse_time),
        }
    }
}
