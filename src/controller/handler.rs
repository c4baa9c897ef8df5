use super::reconciler::ReconcileHandle;
use crate::domain::{ResourceEvent, ResourceKind};
use crate::error::Result;
use crate::events::ResourceEventHandler;
use async_trait::async_trait;
use tracing::{debug, info};

/// Default event handler: logs every event and feeds deployments to the reconciler
#[derive(Clone)]
pub struct ResourceHandler {
    reconcile: ReconcileHandle,
}

impl ResourceHandler {
    #[must_use]
    pub const fn new(reconcile: ReconcileHandle) -> Self {
        Self { reconcile }
    }
}

#[async_trait]
impl ResourceEventHandler for ResourceHandler {
    async fn handle_event(&self, event: ResourceEvent) -> Result<()> {
        let resource = &event.resource;
        match resource.kind {
            ResourceKind::Deployment => {
                info!(
                    namespace = %resource.namespace,
                    name = %resource.name,
                    "🚀 Deployment {}",
                    event.event_type
                );
                self.reconcile.enqueue(resource.key()).await?;
            }
            ResourceKind::Service => {
                info!(namespace = %resource.namespace, name = %resource.name, "🔌 Service {}", event.event_type);
            }
            ResourceKind::Pod => {
                debug!(namespace = %resource.namespace, name = %resource.name, "📦 Pod {}", event.event_type);
            }
            kind => {
                debug!(namespace = %resource.namespace, name = %resource.name, %kind, "Resource {}", event.event_type);
            }
        }
        Ok(())
    }
}
