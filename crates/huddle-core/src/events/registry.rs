//! Event name registry with structural payload schemas.
//!
//! Every publishable event name must be registered together with a schema
//! describing the payload's required fields. Publication of an unregistered
//! name is rejected early, and payloads are checked field-by-field so a
//! violation reports every offending field at once rather than the first.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use regex::Regex;
use serde_json::Value;

use crate::error::EventError;

/// The structural kind expected for a payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A JSON string.
    String,
    /// A JSON number (integer or float).
    Number,
    /// A JSON boolean.
    Bool,
    /// A JSON object.
    Object,
    /// A JSON array.
    Array,
    /// Any JSON value, including null.
    Any,
}

impl FieldKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
            FieldKind::Any => true,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            FieldKind::String => "a string",
            FieldKind::Number => "a number",
            FieldKind::Bool => "a boolean",
            FieldKind::Object => "an object",
            FieldKind::Array => "an array",
            FieldKind::Any => "any value",
        }
    }
}

/// One field expectation inside an [`EventSchema`].
#[derive(Debug, Clone)]
struct FieldSpec {
    name: String,
    kind: FieldKind,
    required: bool,
}

/// Structural schema for one event's payload.
///
/// Built with the builder methods; unknown extra fields are always allowed
/// so that domain servers can enrich payloads without breaking subscribers.
#[derive(Debug, Clone, Default)]
pub struct EventSchema {
    fields: Vec<FieldSpec>,
}

impl EventSchema {
    /// An empty schema: any object payload is accepted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required field of the given kind.
    #[must_use]
    pub fn required(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: true,
        });
        self
    }

    /// Add an optional field of the given kind.
    #[must_use]
    pub fn optional(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: false,
        });
        self
    }

    /// Check a payload against the schema, returning every violation found.
    pub fn violations(&self, payload: &Value) -> Vec<String> {
        let Some(object) = payload.as_object() else {
            return vec!["payload must be a JSON object".to_string()];
        };

        let mut violations = Vec::new();
        for field in &self.fields {
            match object.get(&field.name) {
                None if field.required => {
                    violations.push(format!("missing required field '{}'", field.name));
                }
                None => {}
                Some(value) if !field.kind.accepts(value) => {
                    violations.push(format!(
                        "field '{}' must be {}",
                        field.name,
                        field.kind.describe()
                    ));
                }
                Some(_) => {}
            }
        }
        violations
    }
}

fn name_regex() -> &'static Regex {
    static NAME: OnceLock<Regex> = OnceLock::new();
    NAME.get_or_init(|| Regex::new("^[a-z][a-z-]*:[a-z][a-z-]*$").expect("static regex"))
}

/// Validate the `namespace:kind` shape of an event name.
pub(crate) fn validate_name(name: &str) -> Result<(), EventError> {
    if name_regex().is_match(name) {
        Ok(())
    } else {
        Err(EventError::InvalidName {
            name: name.to_string(),
            message: "expected 'namespace:kind' with lowercase letters and hyphens".to_string(),
        })
    }
}

/// Registry mapping event names to payload schemas.
///
/// The fabric's own lifecycle events (`workflow:triggered`,
/// `workflow:completed`, `workflow:failed`) are always present; domain
/// servers register their events at startup.
#[derive(Debug)]
pub struct EventRegistry {
    schemas: RwLock<HashMap<String, EventSchema>>,
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistry {
    /// Create a registry pre-loaded with the fabric lifecycle events.
    pub fn new() -> Self {
        let registry = Self {
            schemas: RwLock::new(HashMap::new()),
        };
        registry
            .register(
                "workflow:triggered",
                EventSchema::new()
                    .required("workflowId", FieldKind::Number)
                    .required("workflowName", FieldKind::String)
                    .required("runId", FieldKind::Number),
            )
            .expect("fabric event name is valid");
        registry
            .register(
                "workflow:completed",
                EventSchema::new().required("runId", FieldKind::Number),
            )
            .expect("fabric event name is valid");
        registry
            .register(
                "workflow:failed",
                EventSchema::new()
                    .required("runId", FieldKind::Number)
                    .required("error", FieldKind::String),
            )
            .expect("fabric event name is valid");
        registry
    }

    /// Register an event name with its payload schema.
    ///
    /// Registration is idempotent by name: a second registration overwrites
    /// the previous schema.
    pub fn register(&self, name: &str, schema: EventSchema) -> Result<(), EventError> {
        validate_name(name)?;
        self.schemas
            .write()
            .expect("event registry lock poisoned")
            .insert(name.to_string(), schema);
        Ok(())
    }

    /// Whether a name has been registered.
    pub fn contains(&self, name: &str) -> bool {
        self.schemas
            .read()
            .expect("event registry lock poisoned")
            .contains_key(name)
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .schemas
            .read()
            .expect("event registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Validate a payload for publication under `name`.
    pub fn check(&self, name: &str, payload: &Value) -> Result<(), EventError> {
        let schemas = self.schemas.read().expect("event registry lock poisoned");
        let Some(schema) = schemas.get(name) else {
            return Err(EventError::UnknownEvent {
                name: name.to_string(),
            });
        };
        let violations = schema.violations(payload);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(EventError::SchemaViolation {
                name: name.to_string(),
                violations,
            })
        }
    }
}
