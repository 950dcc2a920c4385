//! Starter brick behaviours
//!
//! One lifecycle state machine serves every kind of starter brick; what
//! differs is which listeners it needs and which components an event runs.

use super::host::{ListenerTarget, TriggerSpec};
use super::ModComponent;

pub trait StarterBrickBehavior: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Listeners attached once per page on install
    fn page_targets(&self) -> Vec<ListenerTarget>;

    /// Listeners attached for each registered component
    fn component_targets(&self, _component: &ModComponent) -> Vec<ListenerTarget> {
        Vec::new()
    }

    /// Components an event on `target` should run; `None` means all of them
    fn components_for(&self, target: &ListenerTarget) -> Option<Vec<String>> {
        target.component_id().map(|id| vec![id.to_string()])
    }
}

/// Runs every component when a page-level event fires
#[derive(Debug, Clone)]
pub struct TriggerBehavior {
    pub trigger: TriggerSpec,
}

impl TriggerBehavior {
    pub fn new(trigger: TriggerSpec) -> Self {
        Self { trigger }
    }
}

impl StarterBrickBehavior for TriggerBehavior {
    fn kind(&self) -> &'static str {
        "trigger"
    }

    fn page_targets(&self) -> Vec<ListenerTarget> {
        vec![ListenerTarget::Page {
            trigger: self.trigger.clone(),
        }]
    }
}

/// One button per component inside `container`. The page-level listener
/// watches for the container so buttons can be re-added.
#[derive(Debug, Clone)]
pub struct ButtonBehavior {
    pub container: String,
}

impl ButtonBehavior {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
        }
    }
}

impl StarterBrickBehavior for ButtonBehavior {
    fn kind(&self) -> &'static str {
        "button"
    }

    fn page_targets(&self) -> Vec<ListenerTarget> {
        vec![ListenerTarget::Page {
            trigger: TriggerSpec::Mutation {
                selector: self.container.clone(),
            },
        }]
    }

    fn component_targets(&self, component: &ModComponent) -> Vec<ListenerTarget> {
        vec![ListenerTarget::Button {
            component_id: component.id.clone(),
            container: self.container.clone(),
            label: component.display_label().to_string(),
        }]
    }

    fn components_for(&self, target: &ListenerTarget) -> Option<Vec<String>> {
        match target {
            // Container re-appeared: nothing to run, buttons are re-attached by the host
            ListenerTarget::Page { .. } => Some(Vec::new()),
            other => other.component_id().map(|id| vec![id.to_string()]),
        }
    }
}

/// One context menu item per component
#[derive(Debug, Clone, Default)]
pub struct ContextMenuBehavior;

impl StarterBrickBehavior for ContextMenuBehavior {
    fn kind(&self) -> &'static str {
        "contextMenu"
    }

    fn page_targets(&self) -> Vec<ListenerTarget> {
        Vec::new()
    }

    fn component_targets(&self, component: &ModComponent) -> Vec<ListenerTarget> {
        vec![ListenerTarget::MenuItem {
            component_id: component.id.clone(),
            title: component.display_label().to_string(),
        }]
    }
}
