/**
 * Raw object -> `Resource` conversion
 *
 * Pure functions. A payload that cannot be fully unwrapped still produces a
 * best-effort `Resource`; the anomaly is returned alongside it, never instead of it.
 */
use crate::domain::{Resource, ResourceEvent, ResourceKind};
use crate::error::Error;
use crate::k8s::cache::store::Delta;
use crate::k8s::remote::{Payload, RawObject};
use k8s_openapi::serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Result of converting one payload
#[derive(Debug)]
pub struct Conversion {
    pub resource: Resource,
    /// Set when only part of the identity could be recovered
    pub anomaly: Option<Error>,
}

/// Resolve the kind of a raw object: explicit type information first, then the static type
#[must_use]
pub fn kind_of(obj: &RawObject) -> ResourceKind {
    obj.explicit_kind()
        .map_or_else(|| obj.type_kind(), ResourceKind::from_kind)
}

#[must_use]
pub fn convert_object(obj: &RawObject) -> Resource {
    let meta = obj.meta();
    Resource {
        kind: kind_of(obj),
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        api_version: obj.api_version(),
        labels: meta.labels.clone().unwrap_or_default(),
        data: obj.to_data(),
    }
}

/// Convert a live object or tombstone
///
/// `kind` and `namespace` describe the subscription the payload arrived on and
/// fill identity fields the payload itself does not carry.
#[must_use]
pub fn convert(payload: &Payload, kind: ResourceKind, namespace: &str) -> Conversion {
    let (mut resource, anomaly) = match payload {
        Payload::Value(obj) => (convert_object(obj), None),
        Payload::Tombstone(tombstone) => match &tombstone.last_known {
            Some(obj) => {
                let mut resource = convert_object(obj);
                let (ns, name) = tombstone.split_key();
                if resource.name.is_empty() {
                    resource.name = name.to_string();
                }
                if resource.namespace.is_empty() {
                    resource.namespace = ns.to_string();
                }
                (resource, None)
            }
            None => {
                let (ns, name) = tombstone.split_key();
                let resource = Resource {
                    kind,
                    name: name.to_string(),
                    namespace: ns.to_string(),
                    api_version: String::new(),
                    labels: BTreeMap::new(),
                    data: Value::Null,
                };
                let anomaly = Error::Conversion(format!(
                    "tombstone {} carries no last known object",
                    tombstone.key
                ));
                (resource, Some(anomaly))
            }
        },
    };

    // an explicitly typed but unrecognized object stays Unknown
    let untyped = payload.last_known().is_some_and(|obj| obj.explicit_kind().is_none());
    if resource.kind == ResourceKind::Unknown && untyped {
        resource.kind = kind;
    }
    if resource.namespace.is_empty() {
        resource.namespace = namespace.to_string();
    }

    let anomaly = anomaly.or_else(|| {
        resource
            .name
            .is_empty()
            .then(|| Error::Conversion(format!("{kind} object in {namespace} has no name")))
    });

    Conversion { resource, anomaly }
}

/// Wrap a cache delta as a `ResourceEvent`, logging any conversion anomaly
#[must_use]
pub fn to_event(delta: &Delta, kind: ResourceKind, namespace: &str) -> ResourceEvent {
    let Conversion { resource, anomaly } = convert(&delta.payload, kind, namespace);
    if let Some(anomaly) = anomaly {
        warn!(
            %kind,
            namespace,
            name = %resource.name,
            event = %delta.event_type,
            "Conversion anomaly, delivering best-effort resource: {anomaly}"
        );
    }
    ResourceEvent {
        event_type: delta.event_type,
        resource,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventType;
    use crate::k8s::remote::Tombstone;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::serde_json::{self, json};
    use kube::api::DynamicObject;

    fn deployment(name: &str) -> RawObject {
        RawObject::Deployment(
            serde_json::from_value::<Deployment>(json!({
                "metadata": {"name": name, "namespace": "default", "labels": {"app": name}},
                "spec": {"replicas": 2, "selector": {}, "template": {}}
            }))
            .unwrap(),
        )
    }

    #[test]
    fn test_typed_object_uses_static_kind() {
        let resource = convert_object(&deployment("web"));
        assert_eq!(resource.kind, ResourceKind::Deployment);
        assert_eq!(resource.name, "web");
        assert_eq!(resource.namespace, "default");
        assert_eq!(resource.api_version, "apps/v1");
        assert_eq!(resource.labels.get("app").map(String::as_str), Some("web"));
        assert_eq!(resource.data["spec"]["replicas"], 2);
    }

    #[test]
    fn test_explicit_type_information_wins() {
        let obj: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "settings", "namespace": "default"}
        }))
        .unwrap();
        let resource = convert_object(&RawObject::Dynamic(obj));
        assert_eq!(resource.kind, ResourceKind::ConfigMap);
        assert_eq!(resource.api_version, "v1");
    }

    #[test]
    fn test_unrecognized_type_maps_to_unknown() {
        let obj: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "w", "namespace": "default"}
        }))
        .unwrap();
        let conversion = convert(&Payload::Value(RawObject::Dynamic(obj)), ResourceKind::Deployment, "default");
        assert_eq!(conversion.resource.kind, ResourceKind::Unknown);
        assert!(conversion.anomaly.is_none());
    }

    #[test]
    fn test_untyped_object_takes_subscription_kind() {
        let obj: DynamicObject = serde_json::from_value(json!({
            "metadata": {"name": "w", "namespace": "default"}
        }))
        .unwrap();
        let conversion = convert(&Payload::Value(RawObject::Dynamic(obj)), ResourceKind::Deployment, "default");
        assert_eq!(conversion.resource.kind, ResourceKind::Deployment);
    }

    #[test]
    fn test_tombstone_key_fills_missing_identity() {
        let nameless = RawObject::Deployment(Deployment::default());
        let payload = Payload::Tombstone(Tombstone::new("team-a", "web", Some(nameless)));
        let conversion = convert(&payload, ResourceKind::Deployment, "default");
        assert_eq!(conversion.resource.name, "web");
        assert_eq!(conversion.resource.namespace, "team-a");
        assert!(conversion.anomaly.is_none());
    }

    #[test]
    fn test_tombstone_is_unwrapped() {
        let payload = Payload::Tombstone(Tombstone::new("default", "web", Some(deployment("web"))));
        let conversion = convert(&payload, ResourceKind::Deployment, "default");
        assert!(conversion.anomaly.is_none());
        assert_eq!(conversion.resource.name, "web");
        assert_eq!(conversion.resource.labels.len(), 1);
    }

    #[test]
    fn test_empty_tombstone_degrades_to_identity() {
        let payload = Payload::Tombstone(Tombstone::new("default", "web", None));
        let delta = Delta {
            event_type: EventType::Deleted,
            payload,
        };
        let event = to_event(&delta, ResourceKind::Deployment, "default");
        assert_eq!(event.event_type, EventType::Deleted);
        assert_eq!(event.resource.name, "web");
        assert_eq!(event.resource.namespace, "default");
        assert_eq!(event.resource.kind, ResourceKind::Deployment);
        assert_eq!(event.resource.data, Value::Null);

        let conversion = convert(&delta.payload, ResourceKind::Deployment, "default");
        assert!(matches!(conversion.anomaly, Some(Error::Conversion(_))));
    }
}
