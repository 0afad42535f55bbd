//! Tool registry and argument schemas.
//!
//! The registry maps tool names to a [`ToolDescriptor`] (description plus an
//! ordered parameter list) and a callable. It is filled once at startup and
//! shared read-only between sessions afterwards, so lookups need no locking.
//!
//! Arguments are validated against the descriptor before a callable runs;
//! callables receive [`ToolArgs`] with every declared parameter present and
//! normalised to its declared type.

pub mod text;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::error::SessionError;
use crate::mcp::protocol::ToolDefinition;

/// Errors raised by registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A tool with this name is already registered.
    #[error("duplicate tool name: {0}")]
    DuplicateName(String),

    /// No tool with this name is registered.
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

impl From<RegistryError> for SessionError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::UnknownTool(name) => Self::UnknownTool(name),
            RegistryError::DuplicateName(name) => Self::Rpc {
                code: crate::mcp::protocol::ErrorCode::InternalError.code(),
                message: format!("duplicate tool name: {name}"),
            },
        }
    }
}

/// Failure reported by a tool callable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ToolError(pub String);

impl ToolError {
    /// Creates a tool error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Value returned by a tool.
///
/// Serialises to the plain JSON value (`"text"`, `true`, `3`, `["a"]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResult {
    /// Boolean result.
    Boolean(bool),
    /// Integer result.
    Integer(i64),
    /// String result.
    Text(String),
    /// Ordered list of strings.
    List(Vec<String>),
}

impl ToolResult {
    /// Decodes a JSON value into a tool result.
    ///
    /// # Errors
    ///
    /// Returns an error for values outside the four result shapes.
    pub fn from_value(value: Value) -> Result<Self, SessionError> {
        Ok(serde_json::from_value(value)?)
    }

    /// The JSON value of this result.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Boolean(b) => Value::Bool(*b),
            Self::Integer(n) => Value::from(*n),
            Self::Text(s) => Value::String(s.clone()),
            Self::List(items) => Value::from(items.clone()),
        }
    }

    /// Human-readable rendering used for the text content item.
    ///
    /// Strings are returned verbatim, everything else as compact JSON.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            other => other.to_value().to_string(),
        }
    }
}

impl fmt::Display for ToolResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// JSON string.
    String,
    /// Signed 64-bit integer.
    Integer,
    /// Floating point number.
    Number,
    /// JSON boolean.
    Boolean,
    /// Array of strings.
    StringList,
}

impl ParamType {
    /// The JSON Schema type name.
    #[must_use]
    pub const fn schema_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::StringList => "array",
        }
    }

    /// Checks a supplied value and returns it in normalised form.
    ///
    /// Numeric parameters accept numeric strings and integral floats, the
    /// rest must match exactly.
    #[allow(clippy::cast_possible_truncation)] // integral floats are bounded before the cast
    fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (Self::String, Value::String(_))
            | (Self::Boolean, Value::Bool(_))
            | (Self::Number, Value::Number(_)) => Some(value.clone()),
            (Self::Integer, Value::Number(n)) => n.as_i64().map(Value::from).or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                    .map(|f| Value::from(f as i64))
            }),
            (Self::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (Self::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::from),
            (Self::StringList, Value::Array(items)) => items
                .iter()
                .all(Value::is_string)
                .then(|| value.clone()),
            _ => None,
        }
    }
}

/// A single declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    /// Parameter name.
    pub name: String,
    /// Declared type.
    pub ty: ParamType,
    /// Human-readable description.
    pub description: String,
    /// Default for optional parameters; `None` means required.
    pub default: Option<Value>,
}

impl ParamSpec {
    /// A required parameter.
    pub fn required(
        name: impl Into<String>,
        ty: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            ty,
            description: description.into(),
            default: None,
        }
    }

    /// An optional parameter with a default.
    pub fn optional(
        name: impl Into<String>,
        ty: ParamType,
        description: impl Into<String>,
        default: Value,
    ) -> Self {
        Self {
            name: name.into(),
            ty,
            description: description.into(),
            default: Some(default),
        }
    }

    /// Whether the caller must supply this parameter.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.default.is_none()
    }

    fn schema(&self) -> Value {
        let mut schema = json!({
            "type": self.ty.schema_type(),
            "description": self.description,
        });
        if self.ty == ParamType::StringList {
            schema["items"] = json!({ "type": "string" });
        }
        if let Some(default) = &self.default {
            schema["default"] = default.clone();
        }
        schema
    }
}

/// Immutable description of a registered tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Parameters in declaration order.
    pub params: Vec<ParamSpec>,
}

impl ToolDescriptor {
    /// Creates a descriptor with no parameters.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// JSON Schema for the tool's arguments.
    #[must_use]
    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| (p.name.clone(), p.schema()))
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.is_required())
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Wire form for discovery responses.
    #[must_use]
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: Some(self.description.clone()),
            input_schema: self.input_schema(),
        }
    }

    /// Validates supplied arguments against the parameter list.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Argument`] on a non-object argument value, an
    /// unknown key, a missing required parameter, or a type mismatch.
    pub fn validate(&self, arguments: &Value) -> Result<ToolArgs, SessionError> {
        let empty = Map::new();
        let supplied = match arguments {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(SessionError::Argument(format!(
                    "arguments must be an object, got {}",
                    json_type_name(other)
                )))
            }
        };

        if let Some(unknown) = supplied
            .keys()
            .find(|key| !self.params.iter().any(|p| &p.name == *key))
        {
            return Err(SessionError::Argument(format!(
                "unknown argument '{unknown}' for tool '{}'",
                self.name
            )));
        }

        let mut values = Map::new();
        for spec in &self.params {
            let value = match (supplied.get(&spec.name), &spec.default) {
                (Some(Value::Null) | None, Some(default)) => default.clone(),
                (Some(Value::Null) | None, None) => {
                    return Err(SessionError::Argument(format!(
                        "missing required argument '{}'",
                        spec.name
                    )))
                }
                (Some(value), _) => spec.ty.coerce(value).ok_or_else(|| {
                    SessionError::Argument(format!(
                        "argument '{}' must be of type {}, got {}",
                        spec.name,
                        spec.ty.schema_type(),
                        json_type_name(value)
                    ))
                })?,
            };
            values.insert(spec.name.clone(), value);
        }

        Ok(ToolArgs { values })
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validated arguments handed to a tool callable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs {
    values: Map<String, Value>,
}

impl ToolArgs {
    /// Raw access to a normalised value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// A string parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameter is absent or not a string.
    pub fn str(&self, name: &str) -> Result<&str, ToolError> {
        self.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::new(format!("argument '{name}' is not a string")))
    }

    /// An integer parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameter is absent or not an integer.
    pub fn int(&self, name: &str) -> Result<i64, ToolError> {
        self.get(name)
            .and_then(Value::as_i64)
            .ok_or_else(|| ToolError::new(format!("argument '{name}' is not an integer")))
    }
}

/// The callable side of a tool.
pub type ToolHandler = Arc<dyn Fn(&ToolArgs) -> Result<ToolResult, ToolError> + Send + Sync>;

/// A descriptor paired with its callable.
#[derive(Clone)]
pub struct RegisteredTool {
    /// Tool metadata.
    pub descriptor: ToolDescriptor,
    /// Tool body.
    pub handler: ToolHandler,
}

impl fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Ordered name → tool mapping.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if the name is taken.
    pub fn register<F>(
        &mut self,
        descriptor: ToolDescriptor,
        handler: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&ToolArgs) -> Result<ToolResult, ToolError> + Send + Sync + 'static,
    {
        if self.tools.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateName(descriptor.name));
        }

        tracing::debug!(tool = %descriptor.name, "Registered tool");
        self.tools.insert(
            descriptor.name.clone(),
            RegisteredTool {
                descriptor,
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// Looks a tool up by name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownTool`] if no tool has this name.
    pub fn lookup(&self, name: &str) -> Result<&RegisteredTool, RegistryError> {
        self.tools
            .get(name)
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values().map(|t| &t.descriptor)
    }

    /// Wire definitions in registration order.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.list().map(ToolDescriptor::definition).collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
