//! Tool registry: typed tool specs with runtime registration
//!
//! The registry is filled once at startup and then shared read-only
//! (behind an `Arc`) by the classifier and the executor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Number, Value};

use super::{Arguments, ToolHandler};
use crate::llm::{Tool, ToolFunction};

/// Declared type of a tool argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ArgType {
    fn json_type(self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Integer => "integer",
            ArgType::Number => "number",
            ArgType::Boolean => "boolean",
        }
    }
}

/// Extra restriction on an argument value
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// String value must be one of these (case-insensitive, normalised to the listed form)
    OneOf(Vec<String>),
    /// String value must not exceed this many characters
    MaxLength(usize),
    /// Numeric value must lie within the inclusive range
    Range { min: f64, max: f64 },
}

/// A single argument in a tool's schema
#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub name: String,
    pub kind: ArgType,
    pub required: bool,
    pub description: String,
    pub constraints: Vec<Constraint>,
    /// Value may carry secrets or bulk content; never logged verbatim
    pub sensitive: bool,
}

impl ArgSpec {
    fn new(name: &str, kind: ArgType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            description: description.to_string(),
            constraints: Vec::new(),
            sensitive: false,
        }
    }

    pub fn string(name: &str, description: &str) -> Self {
        Self::new(name, ArgType::String, description)
    }

    pub fn integer(name: &str, description: &str) -> Self {
        Self::new(name, ArgType::Integer, description)
    }

    pub fn number(name: &str, description: &str) -> Self {
        Self::new(name, ArgType::Number, description)
    }

    pub fn boolean(name: &str, description: &str) -> Self {
        Self::new(name, ArgType::Boolean, description)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn one_of(self, values: &[&str]) -> Self {
        self.constraint(Constraint::OneOf(
            values.iter().map(|v| v.to_string()).collect(),
        ))
    }

    fn json_schema(&self) -> Value {
        let mut schema = json!({
            "type": self.kind.json_type(),
            "description": self.description,
        });
        for constraint in &self.constraints {
            match constraint {
                Constraint::OneOf(values) => schema["enum"] = json!(values),
                Constraint::MaxLength(max) => schema["maxLength"] = json!(max),
                Constraint::Range { min, max } => {
                    schema["minimum"] = json!(min);
                    schema["maximum"] = json!(max);
                }
            }
        }
        schema
    }

    /// Coerce `value` to the declared type and check constraints
    fn check(&self, value: &Value) -> Result<Value, ValidationError> {
        let invalid = |reason: String| ValidationError::Invalid {
            name: self.name.clone(),
            reason,
        };

        let coerced = match (self.kind, value) {
            (ArgType::String, Value::String(_)) => value.clone(),
            (ArgType::String, Value::Number(n)) => Value::String(n.to_string()),
            (ArgType::String, Value::Bool(b)) => Value::String(b.to_string()),
            (ArgType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => value.clone(),
            (ArgType::Integer, Value::Number(n)) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Value::Number(Number::from(f as i64)),
                _ => return Err(invalid(format!("expected an integer, got {n}"))),
            },
            (ArgType::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(|i| Value::Number(Number::from(i)))
                .map_err(|_| invalid(format!("expected an integer, got '{s}'")))?,
            (ArgType::Number, Value::Number(_)) => value.clone(),
            (ArgType::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| invalid(format!("expected a number, got '{s}'")))?,
            (ArgType::Boolean, Value::Bool(_)) => value.clone(),
            (ArgType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Value::Bool(true),
                "false" | "no" | "0" => Value::Bool(false),
                _ => return Err(invalid(format!("expected a boolean, got '{s}'"))),
            },
            (kind, other) => {
                return Err(invalid(format!(
                    "expected {}, got {}",
                    kind.json_type(),
                    json_kind(other)
                )))
            }
        };

        let mut coerced = coerced;
        for constraint in &self.constraints {
            match constraint {
                Constraint::OneOf(values) => {
                    let s = coerced.as_str().unwrap_or_default();
                    let Some(found) = values.iter().find(|v| v.eq_ignore_ascii_case(s.trim())) else {
                        return Err(invalid(format!(
                            "'{s}' is not one of: {}",
                            values.join(", ")
                        )));
                    };
                    coerced = Value::String(found.clone());
                }
                Constraint::MaxLength(max) => {
                    let len = coerced.as_str().map_or(0, |s| s.chars().count());
                    if len > *max {
                        return Err(invalid(format!("longer than {max} characters")));
                    }
                }
                Constraint::Range { min, max } => {
                    let n = coerced.as_f64().unwrap_or(f64::NAN);
                    if !(n >= *min && n <= *max) {
                        return Err(invalid(format!("must be between {min} and {max}")));
                    }
                }
            }
        }
        Ok(coerced)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Argument set rejected by a tool's schema
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required argument '{0}'")]
    Missing(String),
    #[error("unknown argument '{0}'")]
    Unknown(String),
    #[error("invalid argument '{name}': {reason}")]
    Invalid { name: String, reason: String },
}

/// Registering a tool id that already exists
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("tool '{0}' is already registered")]
pub struct DuplicateToolError(pub String);

/// Immutable description of one tool
#[derive(Clone)]
pub struct ToolSpec {
    pub id: String,
    /// Natural-language trigger description shown to the model
    pub description: String,
    pub arguments: Vec<ArgSpec>,
    /// Per-tool timeout; the policy default applies when `None`
    pub timeout: Option<Duration>,
    pub handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("arguments", &self.arguments)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ToolSpec {
    pub fn new(
        id: &str,
        description: &str,
        arguments: Vec<ArgSpec>,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            arguments,
            timeout: None,
            handler,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn argument(&self, name: &str) -> Option<&ArgSpec> {
        self.arguments.iter().find(|a| a.name == name)
    }

    /// Validate and coerce an argument set against this schema
    ///
    /// Unknown names are rejected, empty strings count as missing and
    /// missing optional arguments are simply absent from the result.
    pub fn validate(&self, args: &Arguments) -> Result<Arguments, ValidationError> {
        if let Some(unknown) = args.keys().find(|k| self.argument(k).is_none()) {
            return Err(ValidationError::Unknown(unknown.clone()));
        }

        let mut validated = Map::new();
        for spec in &self.arguments {
            let value = args
                .get(&spec.name)
                .filter(|v| !v.is_null() && v.as_str().map_or(true, |s| !s.trim().is_empty()));
            match value {
                Some(v) => {
                    validated.insert(spec.name.clone(), spec.check(v)?);
                }
                None if spec.required => return Err(ValidationError::Missing(spec.name.clone())),
                None => {}
            }
        }
        Ok(validated)
    }

    /// Render arguments for logs, hiding sensitive values
    pub fn redact(&self, args: &Arguments) -> String {
        let parts: Vec<String> = args
            .iter()
            .map(|(name, value)| {
                let sensitive = self.argument(name).map_or(true, |a| a.sensitive);
                if sensitive {
                    let len = value.as_str().map_or_else(|| value.to_string().len(), str::len);
                    format!("{name}=<{len} bytes>")
                } else {
                    format!("{name}={value}")
                }
            })
            .collect();
        parts.join(" ")
    }

    /// OpenAI function declaration for this tool
    pub fn declaration(&self) -> Tool {
        let properties: Map<String, Value> = self
            .arguments
            .iter()
            .map(|a| (a.name.clone(), a.json_schema()))
            .collect();
        let required: Vec<&str> = self
            .arguments
            .iter()
            .filter(|a| a.required)
            .map(|a| a.name.as_str())
            .collect();

        Tool {
            tool_type: "function".to_string(),
            function: ToolFunction {
                name: self.id.clone(),
                description: self.description.clone(),
                parameters: json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }),
            },
        }
    }
}

/// Registry of available tools, in registration order
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; a duplicate id leaves the registry untouched
    pub fn register(&mut self, spec: ToolSpec) -> Result<(), DuplicateToolError> {
        if self.index.contains_key(&spec.id) {
            return Err(DuplicateToolError(spec.id));
        }
        self.index.insert(spec.id.clone(), self.specs.len());
        self.specs.push(spec);
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Option<&ToolSpec> {
        self.index.get(id).map(|&i| &self.specs[i])
    }

    pub fn all(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Function declarations for every tool, in registration order
    pub fn declarations(&self) -> Vec<Tool> {
        self.specs.iter().map(ToolSpec::declaration).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolContext, ToolError};
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, args: &Arguments, _ctx: &ToolContext) -> Result<String, ToolError> {
            Ok(Value::Object(args.clone()).to_string())
        }
    }

    fn spec(id: &str) -> ToolSpec {
        ToolSpec::new(
            id,
            "echo arguments",
            vec![
                ArgSpec::string("text", "text to echo").required(),
                ArgSpec::integer("count", "repetitions")
                    .constraint(Constraint::Range { min: 1.0, max: 5.0 }),
                ArgSpec::string("mode", "output mode").one_of(&["plain", "loud"]),
                ArgSpec::string("secret", "api token").sensitive(),
            ],
            Arc::new(Echo),
        )
    }

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_register_then_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(spec("echo")).unwrap();
        registry.register(spec("other")).unwrap();

        let found = registry.lookup("echo").unwrap();
        assert_eq!(found.id, "echo");
        assert_eq!(found.arguments.len(), 4);
        let ids: Vec<&str> = registry.all().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["echo", "other"]);
        assert!(registry.lookup("missing").is_none());
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(spec("echo")).unwrap();

        let mut replacement = spec("echo");
        replacement.description = "different".to_string();
        let err = registry.register(replacement).unwrap_err();

        assert_eq!(err, DuplicateToolError("echo".to_string()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("echo").unwrap().description, "echo arguments");
    }

    #[test]
    fn test_validate_coerces_strings() {
        let validated = spec("echo")
            .validate(&args(json!({"text": "hi", "count": " 3", "mode": " LOUD"})))
            .unwrap();
        assert_eq!(validated["text"], "hi");
        assert_eq!(validated["count"], 3);
        assert_eq!(validated["mode"], "loud");
    }

    #[test]
    fn test_validate_keeps_string_values_verbatim() {
        let text = "    x = 1\n  y = 2\n";
        let validated = spec("echo").validate(&args(json!({"text": text}))).unwrap();
        assert_eq!(validated["text"], text);
    }

    #[test]
    fn test_validate_rejects_bad_sets() {
        let tool = spec("echo");
        assert_eq!(
            tool.validate(&args(json!({"count": 2}))),
            Err(ValidationError::Missing("text".into()))
        );
        assert_eq!(
            tool.validate(&args(json!({"text": "   "}))),
            Err(ValidationError::Missing("text".into()))
        );
        assert_eq!(
            tool.validate(&args(json!({"text": "a", "extra": 1}))),
            Err(ValidationError::Unknown("extra".into()))
        );
        assert!(tool.validate(&args(json!({"text": "a", "count": 9}))).is_err());
        assert!(tool.validate(&args(json!({"text": "a", "count": "many"}))).is_err());
        assert!(tool.validate(&args(json!({"text": "a", "mode": "quiet"}))).is_err());
        assert!(tool.validate(&args(json!({"text": ["a"]}))).is_err());
    }

    #[test]
    fn test_redact_hides_sensitive_values() {
        let rendered = spec("echo").redact(&args(json!({"text": "hi", "secret": "hunter2"})));
        assert!(rendered.contains("text=\"hi\""));
        assert!(rendered.contains("secret=<7 bytes>"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_declaration_schema() {
        let tool = spec("echo").declaration();
        assert_eq!(tool.function.name, "echo");
        let params = &tool.function.parameters;
        assert_eq!(params["required"], json!(["text"]));
        assert_eq!(params["properties"]["count"]["type"], "integer");
        assert_eq!(params["properties"]["mode"]["enum"], json!(["plain", "loud"]));
    }
}
