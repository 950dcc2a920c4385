//! Render context threaded through a pipeline
//!
//! Precedence, lowest first: step outputs and control-flow bindings, then the
//! reader/event input, integration context, and mod options. A step can never
//! shadow `@input` or `@options` by choosing that output key.
//!
//! Contexts are copy-on-write: binding returns a new context and leaves the
//! one seen by earlier steps untouched.

use crate::types::{JsonObject, JsonValue};

pub const INPUT_KEY: &str = "@input";
pub const OPTIONS_KEY: &str = "@options";
pub const MOD_STATE_KEY: &str = "@mod";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderContext {
    /// `@outputKey` entries and control-flow bindings
    bindings: JsonObject,
    /// Reader/event input, integrations, options, mod state
    base: JsonObject,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, input: JsonValue) -> Self {
        self.base.insert(INPUT_KEY.to_string(), input);
        self
    }

    /// Integration bindings; keys are normalized to carry the `@` sigil
    pub fn with_integrations(mut self, integrations: JsonObject) -> Self {
        for (key, value) in integrations {
            self.base.insert(sigil(&key), value);
        }
        self
    }

    pub fn with_options(mut self, options: JsonValue) -> Self {
        self.base.insert(OPTIONS_KEY.to_string(), options);
        self
    }

    pub fn with_mod_state(mut self, state: JsonObject) -> Self {
        self.base.insert(MOD_STATE_KEY.to_string(), JsonValue::Object(state));
        self
    }

    /// New context with `@name` bound to `value`
    pub fn bind(&self, name: &str, value: JsonValue) -> RenderContext {
        let mut next = self.clone();
        next.bindings.insert(sigil(name), value);
        next
    }

    /// Look up a top-level key as a brick would see it
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.base.get(key).or_else(|| self.bindings.get(key))
    }

    /// Flattened JSON object handed to the resolver and bricks
    pub fn snapshot(&self) -> JsonValue {
        let mut merged = self.bindings.clone();
        for (key, value) in &self.base {
            merged.insert(key.clone(), value.clone());
        }
        JsonValue::Object(merged)
    }
}

fn sigil(name: &str) -> String {
    if name.starts_with('@') {
        name.to_string()
    } else {
        format!("@{name}")
    }
}
