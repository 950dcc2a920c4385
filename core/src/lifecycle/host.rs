//! The page a starter brick is attached to
//!
//! The runtime never touches the DOM. It asks a [`PageHost`] to attach
//! listeners and the host calls back into the lifecycle manager when one
//! fires.

use async_trait::async_trait;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::LifecycleError;

/// Page-level event a trigger listens for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TriggerSpec {
    Load,
    Click { selector: String },
    Hover { selector: String },
    /// Custom DOM event, optionally scoped to a selector
    Event {
        name: String,
        #[serde(default)]
        selector: Option<String>,
    },
    Interval { millis: u64 },
    /// Fires when elements matching `selector` are added to the page
    Mutation { selector: String },
}

/// Something the host attaches a listener to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ListenerTarget {
    /// Shared by every component of the starter brick
    Page { trigger: TriggerSpec },
    /// A button injected into `container` for one component
    #[serde(rename_all = "camelCase")]
    Button {
        component_id: String,
        container: String,
        label: String,
    },
    /// A context menu entry for one component
    #[serde(rename_all = "camelCase")]
    MenuItem { component_id: String, title: String },
}

impl ListenerTarget {
    /// Component the listener belongs to; `None` for page-level listeners
    pub fn component_id(&self) -> Option<&str> {
        match self {
            ListenerTarget::Page { .. } => None,
            ListenerTarget::Button { component_id, .. }
            | ListenerTarget::MenuItem { component_id, .. } => Some(component_id),
        }
    }
}

/// Returned by [`PageHost::attach`]; needed to detach the listener again
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    pub id: u64,
    pub target: ListenerTarget,
}

#[async_trait]
pub trait PageHost: Send + Sync {
    /// URL of the page the runtime is attached to
    fn url(&self) -> String;

    async fn attach(&self, target: ListenerTarget) -> Result<ListenerHandle, LifecycleError>;

    async fn detach(&self, handle: &ListenerHandle) -> Result<(), LifecycleError>;
}

/// Where a starter brick is available
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMatcher {
    /// Glob patterns over the full URL, e.g. `https://*.example.com/*`.
    /// Empty matches every page.
    #[serde(default)]
    pub match_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Selectors that must be present; checked by hosts that can see the page
    #[serde(default)]
    pub selectors: Vec<String>,
}

impl PageMatcher {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matching(pattern: impl Into<String>) -> Self {
        Self {
            match_patterns: vec![pattern.into()],
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait AvailabilityChecker: Send + Sync {
    async fn is_available(&self, matcher: &PageMatcher, url: &str) -> Result<bool, LifecycleError>;
}

/// Checks URL patterns only; `selectors` are ignored
#[derive(Debug, Default, Clone, Copy)]
pub struct UrlPatternChecker;

#[async_trait]
impl AvailabilityChecker for UrlPatternChecker {
    async fn is_available(&self, matcher: &PageMatcher, url: &str) -> Result<bool, LifecycleError> {
        if !matcher.selectors.is_empty() {
            debug!(selectors = ?matcher.selectors, "selector matchers need a page-aware checker; ignoring");
        }

        let included = matcher.match_patterns.is_empty() || any_match(&matcher.match_patterns, url)?;
        let excluded = any_match(&matcher.exclude_patterns, url)?;
        Ok(included && !excluded)
    }
}

fn any_match(patterns: &[String], url: &str) -> Result<bool, LifecycleError> {
    for raw in patterns {
        let pattern = Pattern::new(raw)
            .map_err(|e| LifecycleError::Availability(format!("bad pattern `{raw}`: {e}")))?;
        if pattern.matches(url) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_url_patterns() {
        let checker = UrlPatternChecker;
        let matcher = PageMatcher {
            match_patterns: vec!["https://*.example.com/*".to_string()],
            exclude_patterns: vec!["*/admin/*".to_string()],
            selectors: vec![],
        };

        assert!(checker.is_available(&matcher, "https://docs.example.com/page").await.unwrap());
        assert!(!checker.is_available(&matcher, "https://docs.example.com/admin/x").await.unwrap());
        assert!(!checker.is_available(&matcher, "https://other.org/").await.unwrap());
        assert!(checker.is_available(&PageMatcher::any(), "about:blank").await.unwrap());
    }

    #[tokio::test]
    async fn test_bad_pattern_is_availability_error() {
        let matcher = PageMatcher::matching("https://[");
        let err = UrlPatternChecker.is_available(&matcher, "https://x").await.unwrap_err();
        assert!(matches!(err, LifecycleError::Availability(_)));
    }

    #[test]
    fn test_target_wire_format() {
        let target: ListenerTarget = serde_json::from_value(serde_json::json!({
            "kind": "button",
            "componentId": "c1",
            "container": "#toolbar",
            "label": "Save"
        }))
        .unwrap();
        assert_eq!(target.component_id(), Some("c1"));
    }
}
