//! Component lifecycle manager
//!
//! One manager per starter brick on a page. It owns the page-level listeners,
//! the registered mod components and their per-component listeners, and runs
//! component pipelines when a listener fires.
//!
//! ```text
//! Uninstalled ──install()──▶ Installed ──run()──▶ Running ──▶ Installed
//!      ▲                         │
//!      └────────uninstall()──────┘
//! ```
//!
//! Failures are per component: one component failing never stops the others
//! in the same trigger, and never uninstalls the manager.

pub mod behaviors;
pub mod host;
pub mod reporting;

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{ComponentError, ConfigurationError, ExecutionError, HeadlessInterrupt, LifecycleError};
use crate::pipeline::{compile_pipeline, Pipeline, PipelineExecutor, RenderContext, RunOptions};
use crate::types::{JsonObject, JsonValue};

pub use behaviors::{ButtonBehavior, ContextMenuBehavior, StarterBrickBehavior, TriggerBehavior};
pub use host::{
    AvailabilityChecker, ListenerHandle, ListenerTarget, PageHost, PageMatcher, TriggerSpec,
    UrlPatternChecker,
};
pub use reporting::{
    IntegrationResolver, LoggingNotifier, LoggingPanelController, NoIntegrations, PanelController,
    RunNotifier,
};

/* ===================== Definitions ===================== */

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    /// Every failure goes to the notifier
    #[default]
    All,
    /// Only the first failure per component goes to the notifier
    Once,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StarterBrickDefinition {
    pub id: String,
    #[serde(default)]
    pub matcher: PageMatcher,
    /// Reader bricks whose outputs build `@input`
    #[serde(default)]
    pub readers: Vec<String>,
    #[serde(default)]
    pub report_mode: ReportMode,
}

impl StarterBrickDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            matcher: PageMatcher::any(),
            readers: Vec::new(),
            report_mode: ReportMode::default(),
        }
    }

    pub fn with_matcher(mut self, matcher: PageMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_reader(mut self, brick_id: impl Into<String>) -> Self {
        self.readers.push(brick_id.into());
        self
    }

    pub fn with_report_mode(mut self, mode: ReportMode) -> Self {
        self.report_mode = mode;
        self
    }
}

/// One activated mod component attached to this starter brick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModComponent {
    pub id: String,
    pub mod_id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub pipeline: Pipeline,
    /// Bound as `@options`
    #[serde(default)]
    pub options: JsonValue,
}

impl ModComponent {
    pub fn new(id: impl Into<String>, mod_id: impl Into<String>, pipeline: Pipeline) -> Self {
        Self {
            id: id.into(),
            mod_id: mod_id.into(),
            label: None,
            pipeline,
            options: JsonValue::Null,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_options(mut self, options: JsonValue) -> Self {
        self.options = options;
        self
    }

    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninstalled,
    Installed,
    /// Installed with at least one run in flight
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSummary {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
    /// Components that could not be registered; the rest of the set still is
    pub failed: Vec<(String, LifecycleError)>,
}

/// A trigger firing
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Event context merged over the reader output into `@input`
    pub event: JsonValue,
    /// Restrict the run to these components; `None` runs all of them
    pub component_ids: Option<Vec<String>>,
    pub root: Option<JsonValue>,
    pub cancel: CancellationToken,
}

impl RunRequest {
    pub fn new(event: JsonValue) -> Self {
        Self {
            event,
            ..Self::default()
        }
    }

    pub fn for_components(mut self, ids: Vec<String>) -> Self {
        self.component_ids = Some(ids);
        self
    }
}

#[derive(Debug)]
pub enum ComponentOutcome {
    Completed(Option<JsonValue>),
    /// A renderer ran headless; routed to the panel controller
    Interrupted(HeadlessInterrupt),
    Aborted,
    Failed(ComponentError),
}

/// Per-component outcomes, in registration order
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: IndexMap<String, ComponentOutcome>,
}

impl RunReport {
    pub fn get(&self, component_id: &str) -> Option<&ComponentOutcome> {
        self.outcomes.get(component_id)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&String, &ComponentError)> {
        self.outcomes.iter().filter_map(|(id, outcome)| match outcome {
            ComponentOutcome::Failed(err) => Some((id, err)),
            _ => None,
        })
    }
}

/* ===================== Manager ===================== */

struct RegisteredComponent {
    /// As registered; used to detect unchanged re-registrations
    definition: ModComponent,
    /// Same component with instance ids assigned
    compiled: ModComponent,
    handles: Vec<ListenerHandle>,
}

#[derive(Default)]
struct Inner {
    installed: bool,
    page_handles: Vec<ListenerHandle>,
    components: IndexMap<String, RegisteredComponent>,
    reported: HashSet<String>,
}

pub struct LifecycleManager {
    definition: StarterBrickDefinition,
    behavior: Arc<dyn StarterBrickBehavior>,
    host: Arc<dyn PageHost>,
    executor: Arc<PipelineExecutor>,
    availability: Arc<dyn AvailabilityChecker>,
    integrations: Arc<dyn IntegrationResolver>,
    panels: Arc<dyn PanelController>,
    notifier: Arc<dyn RunNotifier>,
    headless: bool,
    inner: Mutex<Inner>,
    in_flight: AtomicUsize,
}

/// Decrements the in-flight counter when a run ends, however it ends
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl LifecycleManager {
    pub fn new(
        definition: StarterBrickDefinition,
        behavior: Arc<dyn StarterBrickBehavior>,
        host: Arc<dyn PageHost>,
        executor: Arc<PipelineExecutor>,
    ) -> Self {
        Self {
            definition,
            behavior,
            host,
            executor,
            availability: Arc::new(UrlPatternChecker),
            integrations: Arc::new(NoIntegrations),
            panels: Arc::new(LoggingPanelController),
            notifier: Arc::new(LoggingNotifier),
            headless: true,
            inner: Mutex::new(Inner::default()),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_availability(mut self, checker: Arc<dyn AvailabilityChecker>) -> Self {
        self.availability = checker;
        self
    }

    pub fn with_integrations(mut self, resolver: Arc<dyn IntegrationResolver>) -> Self {
        self.integrations = resolver;
        self
    }

    pub fn with_panel_controller(mut self, panels: Arc<dyn PanelController>) -> Self {
        self.panels = panels;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn RunNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn definition(&self) -> &StarterBrickDefinition {
        &self.definition
    }

    pub async fn state(&self) -> LifecycleState {
        let installed = self.inner.lock().await.installed;
        match (installed, self.in_flight.load(Ordering::SeqCst)) {
            (false, _) => LifecycleState::Uninstalled,
            (true, 0) => LifecycleState::Installed,
            (true, _) => LifecycleState::Running,
        }
    }

    pub async fn component_ids(&self) -> Vec<String> {
        self.inner.lock().await.components.keys().cloned().collect()
    }

    /* ===================== Install / uninstall ===================== */

    /// Attach the page-level listeners if the page matches.
    ///
    /// Returns whether the starter brick is installed. Calling it again once
    /// installed is a no-op. If any listener fails to attach, every listener
    /// attached by this call is detached again and the manager stays
    /// uninstalled.
    pub async fn install(&self) -> Result<bool, LifecycleError> {
        let mut inner = self.inner.lock().await;
        if inner.installed {
            return Ok(true);
        }

        let url = self.host.url();
        let available = match self.availability.is_available(&self.definition.matcher, &url).await {
            Ok(available) => available,
            Err(err) => {
                warn!(starter_brick = %self.definition.id, %url, error = %err, "availability check failed");
                false
            }
        };

        if !available {
            debug!(starter_brick = %self.definition.id, %url, "not available on this page");
            self.detach_all(&mut inner).await;
            return Ok(false);
        }

        let mut page_handles = Vec::new();
        for target in self.behavior.page_targets() {
            match self.host.attach(target).await {
                Ok(handle) => page_handles.push(handle),
                Err(err) => {
                    warn!(starter_brick = %self.definition.id, error = %err, "install failed; detaching page listeners");
                    self.detach_best_effort(&page_handles).await;
                    return Err(err);
                }
            }
        }

        // Components registered before install get their listeners now
        let mut attached: Vec<(String, Vec<ListenerHandle>)> = Vec::new();
        for (id, registered) in &inner.components {
            if !registered.handles.is_empty() {
                continue;
            }
            match self.attach_component(&registered.compiled).await {
                Ok(handles) => attached.push((id.clone(), handles)),
                Err(err) => {
                    warn!(
                        starter_brick = %self.definition.id,
                        component_id = %id,
                        error = %err,
                        "install failed; detaching listeners attached so far"
                    );
                    for (_, handles) in &attached {
                        self.detach_best_effort(handles).await;
                    }
                    self.detach_best_effort(&page_handles).await;
                    return Err(err);
                }
            }
        }
        for (id, handles) in attached {
            if let Some(registered) = inner.components.get_mut(&id) {
                registered.handles = handles;
            }
        }
        inner.page_handles = page_handles;
        inner.installed = true;

        info!(
            starter_brick = %self.definition.id,
            kind = self.behavior.kind(),
            components = inner.components.len(),
            "installed"
        );
        Ok(true)
    }

    /// Remove every listener and forget every component. Safe to call when
    /// already uninstalled.
    pub async fn uninstall(&self) {
        let mut inner = self.inner.lock().await;
        let was_installed = inner.installed;
        self.detach_all(&mut inner).await;
        inner.components.clear();
        inner.reported.clear();
        inner.installed = false;
        if was_installed {
            info!(starter_brick = %self.definition.id, "uninstalled");
        }
    }

    async fn detach_all(&self, inner: &mut Inner) {
        let page_handles = std::mem::take(&mut inner.page_handles);
        self.detach_best_effort(&page_handles).await;
        for registered in inner.components.values_mut() {
            let handles = std::mem::take(&mut registered.handles);
            self.detach_best_effort(&handles).await;
        }
    }

    async fn detach_best_effort(&self, handles: &[ListenerHandle]) {
        for handle in handles {
            if let Err(err) = self.host.detach(handle).await {
                warn!(
                    starter_brick = %self.definition.id,
                    listener = handle.id,
                    error = %err,
                    "failed to detach listener; continuing teardown"
                );
            }
        }
    }

    /// Attach all of a component's listeners, or none of them
    async fn attach_component(&self, component: &ModComponent) -> Result<Vec<ListenerHandle>, LifecycleError> {
        let mut handles = Vec::new();
        for target in self.behavior.component_targets(component) {
            match self.host.attach(target).await {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    self.detach_best_effort(&handles).await;
                    return Err(err);
                }
            }
        }
        Ok(handles)
    }

    /* ===================== Components ===================== */

    /// Add a component, or replace its configuration if already registered
    pub async fn register_component(&self, component: ModComponent) -> Result<Registration, LifecycleError> {
        let mut inner = self.inner.lock().await;
        self.register_locked(&mut inner, component).await
    }

    async fn register_locked(
        &self,
        inner: &mut Inner,
        component: ModComponent,
    ) -> Result<Registration, LifecycleError> {
        if let Some(existing) = inner.components.get(&component.id) {
            if existing.definition == component {
                return Ok(Registration::Unchanged);
            }
        }

        let compiled = compile_component(&component)?;
        let targets = self.behavior.component_targets(&compiled);

        match inner.components.get_mut(&component.id) {
            Some(existing) => {
                let old_targets: Vec<ListenerTarget> =
                    existing.handles.iter().map(|h| h.target.clone()).collect();
                // New listeners go up before the old ones come down, so a
                // failed attach leaves the previous registration intact
                if inner.installed && old_targets != targets {
                    let handles = self.attach_component(&compiled).await?;
                    let previous = std::mem::replace(&mut existing.handles, handles);
                    self.detach_best_effort(&previous).await;
                }
                existing.definition = component;
                existing.compiled = compiled;
                inner.reported.remove(&existing.definition.id);
                debug!(component_id = %existing.definition.id, "component updated");
                Ok(Registration::Updated)
            }
            None => {
                let handles = if inner.installed {
                    self.attach_component(&compiled).await?
                } else {
                    Vec::new()
                };
                debug!(component_id = %component.id, "component added");
                inner.components.insert(
                    component.id.clone(),
                    RegisteredComponent {
                        definition: component,
                        compiled,
                        handles,
                    },
                );
                Ok(Registration::Added)
            }
        }
    }

    /// Tear down one component's listeners and state. Returns whether it was
    /// registered.
    pub async fn remove_component(&self, component_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        self.remove_locked(&mut inner, component_id).await
    }

    async fn remove_locked(&self, inner: &mut Inner, component_id: &str) -> bool {
        let Some(registered) = inner.components.shift_remove(component_id) else {
            return false;
        };
        self.detach_best_effort(&registered.handles).await;
        inner.reported.remove(component_id);
        debug!(component_id, "component removed");
        true
    }

    /// Make the registered set equal `desired`: components not in it are torn
    /// down, new or changed ones are registered, unchanged ones are left
    /// alone. A component that fails to register is reported in
    /// [`SyncSummary::failed`] and does not stop the others.
    pub async fn synchronize_components(&self, desired: Vec<ModComponent>) -> SyncSummary {
        let mut inner = self.inner.lock().await;
        let mut summary = SyncSummary::default();

        let keep: HashSet<&str> = desired.iter().map(|c| c.id.as_str()).collect();
        let stale: Vec<String> = inner
            .components
            .keys()
            .filter(|id| !keep.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            if self.remove_locked(&mut inner, &id).await {
                summary.removed.push(id);
            }
        }

        for component in desired {
            let id = component.id.clone();
            match self.register_locked(&mut inner, component).await {
                Ok(Registration::Added) => summary.added.push(id),
                Ok(Registration::Updated) => summary.updated.push(id),
                Ok(Registration::Unchanged) => summary.unchanged.push(id),
                Err(err) => {
                    warn!(starter_brick = %self.definition.id, component_id = %id, error = %err, "component not registered");
                    summary.failed.push((id, err));
                }
            }
        }

        debug!(
            starter_brick = %self.definition.id,
            added = summary.added.len(),
            updated = summary.updated.len(),
            removed = summary.removed.len(),
            failed = summary.failed.len(),
            "components synchronized"
        );
        summary
    }

    /* ===================== Run ===================== */

    /// Dispatch an event from a listener this manager attached
    pub async fn handle_event(&self, target: &ListenerTarget, event: JsonValue) -> RunReport {
        let mut request = RunRequest::new(event);
        request.component_ids = self.behavior.components_for(target);
        self.run(request).await
    }

    /// Run every selected component's pipeline for one trigger
    pub async fn run(&self, request: RunRequest) -> RunReport {
        let components: Vec<ModComponent> = {
            let inner = self.inner.lock().await;
            if !inner.installed {
                debug!(starter_brick = %self.definition.id, "run requested while uninstalled");
                return RunReport::default();
            }
            inner
                .components
                .values()
                .filter(|r| {
                    request
                        .component_ids
                        .as_ref()
                        .map_or(true, |ids| ids.contains(&r.compiled.id))
                })
                .map(|r| r.compiled.clone())
                .collect()
        };

        let mut report = RunReport::default();
        if components.is_empty() {
            return report;
        }
        let _running = InFlight::enter(&self.in_flight);

        let input = self.read_input(&request).await;
        for component in components {
            let outcome = match &input {
                Ok(input) => self.run_component(&component, input, &request).await,
                Err(err) => ComponentOutcome::Failed(err.clone().into()),
            };
            self.report(&component, &outcome).await;
            report.outcomes.insert(component.id.clone(), outcome);
        }
        report
    }

    /// `@input`: reader outputs merged in order, with the event on top
    async fn read_input(&self, request: &RunRequest) -> Result<JsonValue, LifecycleError> {
        if self.definition.readers.is_empty() {
            return Ok(request.event.clone());
        }

        let options = RunOptions {
            root: request.root.clone(),
            cancel: request.cancel.clone(),
            ..RunOptions::default()
        };
        let mut input = JsonObject::new();
        for reader in &self.definition.readers {
            let value = self
                .executor
                .run_reader(reader, &request.event, &options)
                .await
                .map_err(|err| LifecycleError::Reader {
                    brick_id: reader.clone(),
                    message: err.to_string(),
                })?;
            match value {
                JsonValue::Object(map) => input.extend(map),
                JsonValue::Null => {}
                other => {
                    input.insert(reader.clone(), other);
                }
            }
        }
        if let JsonValue::Object(event) = &request.event {
            input.extend(event.clone());
        }
        Ok(JsonValue::Object(input))
    }

    async fn run_component(
        &self,
        component: &ModComponent,
        input: &JsonValue,
        request: &RunRequest,
    ) -> ComponentOutcome {
        let integrations = match self.integrations.resolve(component).await {
            Ok(integrations) => integrations,
            Err(err) => return ComponentOutcome::Failed(err.into()),
        };

        let context = RenderContext::new()
            .with_input(input.clone())
            .with_integrations(integrations)
            .with_options(component.options.clone());
        let options = RunOptions {
            run_id: Uuid::new_v4(),
            mod_id: Some(component.mod_id.clone()),
            component_id: Some(component.id.clone()),
            root: request.root.clone(),
            headless: self.headless,
            cancel: request.cancel.child_token(),
        };

        match self.executor.run(&component.pipeline, context, &options).await {
            Ok(result) => ComponentOutcome::Completed(result.output),
            Err(ExecutionError::Headless(interrupt)) => ComponentOutcome::Interrupted(interrupt),
            Err(ExecutionError::Aborted) => ComponentOutcome::Aborted,
            Err(err) => ComponentOutcome::Failed(err.into()),
        }
    }

    async fn report(&self, component: &ModComponent, outcome: &ComponentOutcome) {
        match outcome {
            ComponentOutcome::Completed(_) => {
                debug!(component_id = %component.id, "run completed");
            }
            ComponentOutcome::Aborted => {
                debug!(component_id = %component.id, "run aborted");
            }
            ComponentOutcome::Interrupted(interrupt) => {
                if let Err(err) = self.panels.show(&component.id, interrupt).await {
                    warn!(component_id = %component.id, error = %err, "could not show renderer output");
                }
            }
            ComponentOutcome::Failed(err) => {
                let first = self.inner.lock().await.reported.insert(component.id.clone());
                if self.definition.report_mode == ReportMode::All || first {
                    self.notifier.failure(component, err).await;
                } else {
                    debug!(component_id = %component.id, error = %err, "failure already reported");
                }
            }
        }
    }
}

fn compile_component(component: &ModComponent) -> Result<ModComponent, ConfigurationError> {
    let mut compiled = component.clone();
    compile_pipeline(&mut compiled.pipeline)?;
    Ok(compiled)
}
