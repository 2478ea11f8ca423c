//! Parsed template documents.
//!
//! Each YAML document becomes an [`Instruction`]. Template field specs are
//! converted once, at parse time, into a [`FieldNode`] tree so composition
//! never re-inspects raw maps.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;

use super::errors::{TemplateError, TemplateResult};
use crate::expression::{Expression, ExpressionError, ExpressionResult};

const CONDITION_KEY: &str = "if";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionKind {
    View,
    Template,
}

impl InstructionKind {
    pub fn parse(kind: &str) -> TemplateResult<Self> {
        match kind.trim() {
            "View" => Ok(Self::View),
            "Template" => Ok(Self::Template),
            other => Err(TemplateError::UnsupportedKind {
                kind: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::View => f.write_str("View"),
            Self::Template => f.write_str("Template"),
        }
    }
}

/// An `if` expression. Syntax errors are kept and reported when evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expression: ExpressionResult<Expression>,
}

impl Condition {
    pub fn parse(source: &str) -> Self {
        Self {
            source: source.to_string(),
            expression: Expression::parse(source),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Validate identifiers and evaluate to a boolean
    pub fn evaluate(&self, env: &Value) -> ExpressionResult<bool> {
        self.expression
            .as_ref()
            .map_err(Clone::clone)?
            .evaluate_condition(env)
    }
}

/// Declared scalar type of a `path` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Number,
}

impl ScalarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
        }
    }
}

/// Where a `path` reads its value from
#[derive(Debug, Clone, PartialEq)]
pub enum PathTarget {
    /// Evaluated against `{item, context}`
    Local(Expression),
    /// `provider.method[.rest]`: call the provider with the item, then
    /// evaluate `rest` against the response re-rooted as `item`
    Provider {
        provider: String,
        method: String,
        rest: Expression,
    },
    /// The path did not parse; resolves to null
    Invalid(ExpressionError),
}

impl PathTarget {
    pub fn parse(source: &str) -> Self {
        let expression = match Expression::parse(source) {
            Ok(expression) => expression,
            Err(e) => return Self::Invalid(e),
        };
        match expression.root_identifier() {
            Some("item") | Some("context") | None => Self::Local(expression),
            Some(_) => match expression.split_call_path("item") {
                Some((provider, method, rest)) => Self::Provider {
                    provider,
                    method,
                    rest,
                },
                None => Self::Local(expression),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldNode {
    /// Copied into the result unchanged
    Literal(Value),
    Path {
        kind: ScalarKind,
        source: String,
        target: PathTarget,
    },
    /// A `value` string rendered with `item` and `context`
    Interpolated(String),
    Bool(bool),
    /// Nested fields, merged shallowly into an existing object
    Object(Vec<Field>),
    Array(Vec<ArrayElement>),
    /// Produces nothing; the reason is logged
    Skip(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub key: String,
    pub node: FieldNode,
}

/// One element of an `array` field
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayElement {
    pub condition: Option<Condition>,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstructionBody {
    /// Names of the templates a selected view contributes
    View { templates: Vec<String> },
    Template { fields: Vec<Field> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub version: String,
    pub name: Option<String>,
    pub metadata: Map<String, Value>,
    /// Hoisted from `spec.if`
    pub condition: Option<Condition>,
    pub body: InstructionBody,
}

#[derive(Debug, Deserialize)]
struct RawInstruction {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
    #[serde(default)]
    spec: Option<Map<String, Value>>,
}

impl Instruction {
    /// Build an instruction from one decoded YAML document
    pub fn from_document(document: Value) -> TemplateResult<Self> {
        let raw: RawInstruction = serde_json::from_value(document)
            .map_err(|e| TemplateError::invalid_document(e.to_string()))?;
        let kind = InstructionKind::parse(&raw.kind)?;
        let metadata = raw.metadata.unwrap_or_default();
        let spec = raw.spec.unwrap_or_default();

        let name = metadata
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);
        let condition = spec
            .get(CONDITION_KEY)
            .and_then(Value::as_str)
            .filter(|source| !source.trim().is_empty())
            .map(Condition::parse);

        let body = match kind {
            InstructionKind::View => InstructionBody::View {
                templates: view_templates(&spec),
            },
            InstructionKind::Template => InstructionBody::Template {
                fields: parse_fields(&spec, true),
            },
        };

        Ok(Self {
            kind,
            version: raw.version,
            name,
            metadata,
            condition,
            body,
        })
    }

    pub fn is_view(&self) -> bool {
        self.kind == InstructionKind::View
    }
}

fn view_templates(spec: &Map<String, Value>) -> Vec<String> {
    spec.get("template")
        .and_then(|template| template.get("templates"))
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Convert a map of field specs; `skip_condition` drops the `if` key
fn parse_fields(spec: &Map<String, Value>, skip_condition: bool) -> Vec<Field> {
    spec.iter()
        .filter(|(key, _)| !(skip_condition && key.trim() == CONDITION_KEY))
        .map(|(key, value)| Field {
            key: key.clone(),
            node: match value {
                Value::Object(map) => parse_typed(map),
                other => FieldNode::Literal(other.clone()),
            },
        })
        .collect()
}

fn parse_typed(spec: &Map<String, Value>) -> FieldNode {
    let Some(declared) = spec.get("type") else {
        return parse_object(spec);
    };

    match declared.as_str().unwrap_or_default() {
        "string" => match (spec.get("path"), spec.get("value")) {
            (Some(Value::String(path)), _) => path_node(ScalarKind::String, path),
            (Some(_), _) => FieldNode::Skip("path value is not a string".to_string()),
            (None, Some(Value::String(template))) => FieldNode::Interpolated(template.clone()),
            (None, Some(_)) => FieldNode::Skip("value is not a string".to_string()),
            (None, None) => FieldNode::Skip("string field has neither path nor value".to_string()),
        },
        "number" => match spec.get("path") {
            Some(Value::String(path)) => path_node(ScalarKind::Number, path),
            Some(_) => FieldNode::Skip("path value is not a string".to_string()),
            None => FieldNode::Skip("number field has no path".to_string()),
        },
        "bool" => match spec.get("value") {
            Some(Value::Bool(value)) => FieldNode::Bool(*value),
            _ => FieldNode::Skip("bool field value is not a boolean".to_string()),
        },
        "array" => match spec.get("value") {
            Some(Value::Array(elements)) => FieldNode::Array(
                elements
                    .iter()
                    .filter_map(Value::as_object)
                    .map(|element| ArrayElement {
                        condition: element
                            .get(CONDITION_KEY)
                            .and_then(Value::as_str)
                            .filter(|source| !source.is_empty())
                            .map(Condition::parse),
                        fields: parse_fields(element, true),
                    })
                    .collect(),
            ),
            _ => FieldNode::Skip("array field value is not a list".to_string()),
        },
        "object" => parse_object(spec),
        _ => FieldNode::Literal(Value::Object(spec.clone())),
    }
}

fn parse_object(spec: &Map<String, Value>) -> FieldNode {
    match spec.get("value") {
        Some(Value::Object(fields)) => FieldNode::Object(parse_fields(fields, false)),
        _ => FieldNode::Literal(Value::Object(spec.clone())),
    }
}

fn path_node(kind: ScalarKind, source: &str) -> FieldNode {
    FieldNode::Path {
        kind,
        source: source.to_string(),
        target: PathTarget::parse(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template(spec: Value) -> Vec<Field> {
        let instruction = Instruction::from_document(json!({
            "kind": "Template",
            "version": "v1",
            "metadata": {"name": "t"},
            "spec": spec,
        }))
        .unwrap();
        match instruction.body {
            InstructionBody::Template { fields } => fields,
            other => panic!("unexpected body {other:?}"),
        }
    }

    fn node<'a>(fields: &'a [Field], key: &str) -> &'a FieldNode {
        &fields.iter().find(|f| f.key == key).unwrap().node
    }

    #[test]
    fn test_view_collects_template_names_and_condition() {
        let instruction = Instruction::from_document(json!({
            "kind": " View ",
            "version": "v1",
            "spec": {
                "if": "item.id > 1",
                "template": {"templates": ["a", "b", 3]},
            },
        }))
        .unwrap();

        assert!(instruction.is_view());
        assert_eq!(instruction.condition.as_ref().unwrap().source(), "item.id > 1");
        assert_eq!(
            instruction.body,
            InstructionBody::View {
                templates: vec!["a".to_string(), "b".to_string()]
            }
        );
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = Instruction::from_document(json!({"kind": "Widget"})).unwrap_err();
        assert!(matches!(err, TemplateError::UnsupportedKind { .. }));
    }

    #[test]
    fn test_non_map_spec_is_invalid() {
        let err = Instruction::from_document(json!({"kind": "Template", "spec": [1, 2]}))
            .unwrap_err();
        assert!(matches!(err, TemplateError::InvalidDocument(_)));
    }

    #[test]
    fn test_field_variants() {
        let fields = template(json!({
            "if": "true",
            "plain": 7,
            "title": {"type": "string", "value": "Hi {{ item.name }}"},
            "code": {"type": "number", "path": "item.code"},
            "flag": {"type": "bool", "value": true},
            "broken_flag": {"type": "bool", "value": "yes"},
            "custom": {"type": "color", "value": "red"},
            "nested": {"value": {"inner": {"type": "string", "path": "context.region"}, "n": 1}},
            "opaque": {"type": "object", "value": 5},
        }));

        assert!(fields.iter().all(|f| f.key != "if"));
        assert_eq!(node(&fields, "plain"), &FieldNode::Literal(json!(7)));
        assert_eq!(
            node(&fields, "title"),
            &FieldNode::Interpolated("Hi {{ item.name }}".to_string())
        );
        assert!(matches!(
            node(&fields, "code"),
            FieldNode::Path { kind: ScalarKind::Number, target: PathTarget::Local(_), .. }
        ));
        assert_eq!(node(&fields, "flag"), &FieldNode::Bool(true));
        assert!(matches!(node(&fields, "broken_flag"), FieldNode::Skip(_)));
        assert_eq!(
            node(&fields, "custom"),
            &FieldNode::Literal(json!({"type": "color", "value": "red"}))
        );
        match node(&fields, "nested") {
            FieldNode::Object(inner) => {
                assert_eq!(node(inner, "n"), &FieldNode::Literal(json!(1)));
                assert!(matches!(node(inner, "inner"), FieldNode::Path { .. }));
            }
            other => panic!("unexpected node {other:?}"),
        }
        assert_eq!(
            node(&fields, "opaque"),
            &FieldNode::Literal(json!({"type": "object", "value": 5}))
        );
    }

    #[test]
    fn test_untyped_map_without_value_is_kept_verbatim() {
        let fields = template(json!({
            "meta": {"id": {"type": "string", "path": "item.id"}},
        }));

        assert_eq!(
            node(&fields, "meta"),
            &FieldNode::Literal(json!({"id": {"type": "string", "path": "item.id"}}))
        );
    }

    #[test]
    fn test_provider_paths_are_split() {
        let fields = template(json!({
            "likes": {"type": "number", "path": "reaction.GetCounters.counters[0].likes"},
            "broken": {"type": "string", "path": "item.("},
        }));

        match node(&fields, "likes") {
            FieldNode::Path {
                target: PathTarget::Provider { provider, method, rest },
                ..
            } => {
                assert_eq!(provider, "reaction");
                assert_eq!(method, "GetCounters");
                assert_eq!(
                    rest.evaluate(&json!({"item": {"counters": [{"likes": 9}]}})).unwrap(),
                    json!(9)
                );
            }
            other => panic!("unexpected node {other:?}"),
        }
        assert!(matches!(
            node(&fields, "broken"),
            FieldNode::Path { target: PathTarget::Invalid(_), .. }
        ));
    }

    #[test]
    fn test_array_elements_keep_conditions_and_drop_scalars() {
        let fields = template(json!({
            "actions": {
                "type": "array",
                "value": [
                    {"if": "item.role == 'admin'", "label": "Delete"},
                    "not-an-object",
                    {"label": "View"},
                ],
            },
        }));

        match node(&fields, "actions") {
            FieldNode::Array(elements) => {
                assert_eq!(elements.len(), 2);
                assert!(elements[0].condition.is_some());
                assert!(elements[0].fields.iter().all(|f| f.key != "if"));
                assert!(elements[1].condition.is_none());
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn test_condition_syntax_error_surfaces_on_evaluate() {
        let condition = Condition::parse("item.id ==");
        assert!(condition.evaluate(&json!({"item": {"id": 1}})).is_err());
    }
}
