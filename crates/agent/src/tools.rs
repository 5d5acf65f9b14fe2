use std::collections::HashMap;

use async_trait::async_trait;
use careline_core::errors::DomainError;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    String,
    Integer,
}

impl ParameterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParameterSchema {
    pub name: &'static str,
    pub kind: ParameterKind,
    pub description: &'static str,
    pub required: bool,
}

/// Machine-readable description of a capability, advertised to the completion provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CapabilitySchema {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Vec<ParameterSchema>,
}

impl CapabilitySchema {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self { name, description, parameters: Vec::new() }
    }

    pub fn required(self, name: &'static str, kind: ParameterKind, description: &'static str) -> Self {
        self.parameter(name, kind, description, true)
    }

    pub fn optional(self, name: &'static str, kind: ParameterKind, description: &'static str) -> Self {
        self.parameter(name, kind, description, false)
    }

    fn parameter(
        mut self,
        name: &'static str,
        kind: ParameterKind,
        description: &'static str,
        required: bool,
    ) -> Self {
        self.parameters.push(ParameterSchema { name, kind, description, required });
        self
    }

    /// The `tools[]` entry of an OpenAI chat-completions request.
    pub fn to_openai_tool(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|parameter| {
                (
                    parameter.name.to_string(),
                    json!({ "type": parameter.kind.as_str(), "description": parameter.description }),
                )
            })
            .collect();
        let required: Vec<&str> =
            self.parameters.iter().filter(|parameter| parameter.required).map(|p| p.name).collect();

        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": { "type": "object", "properties": properties, "required": required },
            }
        })
    }

    /// One-line call signature used when calls are written as prose, e.g.
    /// `get_available_times(provider_id=<integer>, department_id=<integer>, end_date=<string>?)`.
    pub fn signature(&self) -> String {
        let parameters: Vec<String> = self
            .parameters
            .iter()
            .map(|parameter| {
                let optional = if parameter.required { "" } else { "?" };
                format!("{}=<{}>{optional}", parameter.name, parameter.kind.as_str())
            })
            .collect();
        format!("{}({})", self.name, parameters.join(", "))
    }
}

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("arguments must be a JSON object, got {0}")]
    NotAnObject(String),
    #[error("missing required argument `{0}`")]
    MissingArgument(&'static str),
    #[error("argument `{name}` must be {expected}")]
    InvalidArgument { name: &'static str, expected: &'static str },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{0}")]
    Backend(String),
}

/// Named arguments of one invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct Arguments(Map<String, Value>);

impl Arguments {
    pub fn parse(value: Value) -> Result<Self, CapabilityError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self(Map::new())),
            other => Err(CapabilityError::NotAnObject(other.to_string())),
        }
    }

    pub fn str(&self, name: &'static str) -> Result<&str, CapabilityError> {
        self.optional_str(name)?.ok_or(CapabilityError::MissingArgument(name))
    }

    pub fn optional_str(&self, name: &'static str) -> Result<Option<&str>, CapabilityError> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.as_str())),
            Some(_) => Err(CapabilityError::InvalidArgument { name, expected: "a string" }),
        }
    }

    /// Integers may also arrive as numeric strings when calls are parsed from prose.
    pub fn int(&self, name: &'static str) -> Result<i64, CapabilityError> {
        let invalid = CapabilityError::InvalidArgument { name, expected: "an integer" };
        match self.0.get(name) {
            None | Some(Value::Null) => Err(CapabilityError::MissingArgument(name)),
            Some(Value::Number(number)) => number.as_i64().ok_or(invalid),
            Some(Value::String(value)) => value.trim().parse().map_err(|_| invalid),
            Some(_) => Err(invalid),
        }
    }
}

#[async_trait]
pub trait Capability: Send + Sync {
    fn schema(&self) -> &CapabilitySchema;

    fn name(&self) -> &'static str {
        self.schema().name
    }

    /// Whether this is the irreversible action gated behind a complete booking.
    fn is_commit(&self) -> bool {
        false
    }

    async fn execute(&self, arguments: Value) -> Result<Value, CapabilityError>;
}

/// Closed name -> capability table, built once per process and looked up by exact name.
pub struct CapabilityRegistry {
    capabilities: Vec<Box<dyn Capability>>,
    index: HashMap<&'static str, usize>,
    schemas: Vec<CapabilitySchema>,
}

#[derive(Default)]
pub struct CapabilityRegistryBuilder {
    capabilities: Vec<Box<dyn Capability>>,
}

impl CapabilityRegistryBuilder {
    /// Registering a name twice keeps the later capability in the earlier position.
    pub fn register<C>(mut self, capability: C) -> Self
    where
        C: Capability + 'static,
    {
        let name = capability.name();
        match self.capabilities.iter().position(|existing| existing.name() == name) {
            Some(position) => self.capabilities[position] = Box::new(capability),
            None => self.capabilities.push(Box::new(capability)),
        }
        self
    }

    pub fn build(self) -> CapabilityRegistry {
        let index = self
            .capabilities
            .iter()
            .enumerate()
            .map(|(position, capability)| (capability.name(), position))
            .collect();
        let schemas = self.capabilities.iter().map(|capability| capability.schema().clone()).collect();
        CapabilityRegistry { capabilities: self.capabilities, index, schemas }
    }
}

impl CapabilityRegistry {
    pub fn builder() -> CapabilityRegistryBuilder {
        CapabilityRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Capability> {
        self.index.get(name).map(|position| self.capabilities[*position].as_ref())
    }

    pub fn is_commit(&self, name: &str) -> bool {
        self.get(name).is_some_and(|capability| capability.is_commit())
    }

    pub fn commit_capability(&self) -> Option<&'static str> {
        self.capabilities.iter().find(|capability| capability.is_commit()).map(|c| c.name())
    }

    /// Schemas in registration order.
    pub fn schemas(&self) -> &[CapabilitySchema] {
        &self.schemas
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.schemas.iter().map(|schema| schema.name)
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::{
        Arguments, Capability, CapabilityError, CapabilityRegistry, CapabilitySchema, ParameterKind,
    };

    struct Echo {
        schema: CapabilitySchema,
        reply: &'static str,
    }

    impl Echo {
        fn new(name: &'static str, reply: &'static str) -> Self {
            Self {
                schema: CapabilitySchema::new(name, "Echo the input")
                    .required("text", ParameterKind::String, "Text to echo")
                    .optional("times", ParameterKind::Integer, "Repeat count"),
                reply,
            }
        }
    }

    #[async_trait]
    impl Capability for Echo {
        fn schema(&self) -> &CapabilitySchema {
            &self.schema
        }

        async fn execute(&self, _arguments: Value) -> Result<Value, CapabilityError> {
            Ok(json!({ "reply": self.reply }))
        }
    }

    #[test]
    fn openai_tool_lists_required_parameters() {
        let tool = Echo::new("echo", "a").schema.to_openai_tool();

        assert_eq!(tool["type"], json!("function"));
        assert_eq!(tool["function"]["parameters"]["required"], json!(["text"]));
        assert_eq!(tool["function"]["parameters"]["properties"]["times"]["type"], json!("integer"));
    }

    #[test]
    fn signature_marks_optional_parameters() {
        assert_eq!(Echo::new("echo", "a").schema.signature(), "echo(text=<string>, times=<integer>?)");
    }

    #[tokio::test]
    async fn registry_looks_up_by_exact_name_and_later_registration_wins() {
        let registry = CapabilityRegistry::builder()
            .register(Echo::new("echo", "first"))
            .register(Echo::new("shout", "loud"))
            .register(Echo::new("echo", "second"))
            .build();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["echo", "shout"]);
        assert!(registry.get("Echo").is_none());
        assert!(!registry.is_commit("echo"));

        let capability = registry.get("echo").expect("registered");
        let result = capability.execute(json!({"text": "hi"})).await.expect("execute");
        assert_eq!(result, json!({"reply": "second"}));
    }

    #[test]
    fn arguments_coerce_numeric_strings_and_reject_wrong_shapes() {
        let arguments =
            Arguments::parse(json!({"provider_id": "2", "specialty": 7})).expect("object");

        assert_eq!(arguments.int("provider_id").expect("int"), 2);
        assert!(matches!(
            arguments.str("specialty"),
            Err(CapabilityError::InvalidArgument { name: "specialty", .. })
        ));
        assert!(matches!(arguments.int("department_id"), Err(CapabilityError::MissingArgument(_))));
        assert!(matches!(
            Arguments::parse(json!("provider 2")),
            Err(CapabilityError::NotAnObject(_))
        ));
    }
}
