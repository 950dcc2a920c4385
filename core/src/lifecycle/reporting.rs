//! Collaborators the lifecycle manager reports to or pulls context from

use async_trait::async_trait;
use tracing::{info, warn};

use super::ModComponent;
use crate::errors::{ComponentError, HeadlessInterrupt, LifecycleError};
use crate::types::JsonObject;

/// Displays renderer output outside the pipeline (panel, modal)
#[async_trait]
pub trait PanelController: Send + Sync {
    async fn show(&self, component_id: &str, interrupt: &HeadlessInterrupt) -> Result<(), LifecycleError>;
}

/// Surfaces failed runs to the user
#[async_trait]
pub trait RunNotifier: Send + Sync {
    async fn failure(&self, component: &ModComponent, error: &ComponentError);
}

/// Integration context for a component, bound as `@<key>` in the render context
#[async_trait]
pub trait IntegrationResolver: Send + Sync {
    async fn resolve(&self, component: &ModComponent) -> Result<JsonObject, LifecycleError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPanelController;

#[async_trait]
impl PanelController for LoggingPanelController {
    async fn show(&self, component_id: &str, interrupt: &HeadlessInterrupt) -> Result<(), LifecycleError> {
        info!(
            component_id,
            brick_id = %interrupt.brick_id,
            instance_id = %interrupt.instance_id,
            "no panel attached; dropping renderer output"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl RunNotifier for LoggingNotifier {
    async fn failure(&self, component: &ModComponent, error: &ComponentError) {
        warn!(
            component_id = %component.id,
            mod_id = %component.mod_id,
            error = %error,
            "mod component run failed"
        );
    }
}

/// No integrations configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIntegrations;

#[async_trait]
impl IntegrationResolver for NoIntegrations {
    async fn resolve(&self, _component: &ModComponent) -> Result<JsonObject, LifecycleError> {
        Ok(JsonObject::new())
    }
}
