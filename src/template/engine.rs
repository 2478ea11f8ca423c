//! Template parsing and per-item composition

use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::errors::{TemplateError, TemplateResult};
use super::instruction::{
    ArrayElement, Field, FieldNode, Instruction, InstructionBody, PathTarget, ScalarKind,
};
use super::interpolate::interpolate;
use crate::context::RequestContext;
use crate::expression::Expression;
use crate::metrics::template::TemplateMetrics;
use crate::provider::{
    CallOutcome, DynamicProvider, ProviderError, ProviderSpecParser, ProviderStorage,
    RetryPolicy, PROVIDER_KIND,
};

/// Parses template streams and composes item views.
///
/// Provider documents found while parsing are registered into the shared
/// [`ProviderStorage`]; everything else becomes an [`Instruction`].
#[derive(Debug)]
pub struct TemplateEngine {
    providers: Arc<ProviderStorage>,
    parser: ProviderSpecParser,
    retry: RetryPolicy,
    metrics: TemplateMetrics,
}

impl TemplateEngine {
    pub fn new(providers: Arc<ProviderStorage>) -> Self {
        Self {
            providers,
            parser: ProviderSpecParser::new(),
            retry: RetryPolicy::default(),
            metrics: TemplateMetrics::new(),
        }
    }

    /// Retry policy given to providers registered by [`parse`](Self::parse)
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn providers(&self) -> &Arc<ProviderStorage> {
        &self.providers
    }

    /// Decode a multi-document YAML stream.
    ///
    /// Any malformed document fails the whole parse.
    pub fn parse(&self, bytes: &[u8]) -> TemplateResult<Vec<Instruction>> {
        let started = Instant::now();
        self.metrics.parse_started();

        let result = self.parse_documents(bytes);
        match &result {
            Ok(instructions) => {
                self.metrics.parse_finished(started.elapsed());
                debug!(
                    component = "template_engine",
                    instructions = instructions.len(),
                    "Parsed template documents"
                );
            }
            Err(e) => self.metrics.error(e.error_type()),
        }
        result
    }

    fn parse_documents(&self, bytes: &[u8]) -> TemplateResult<Vec<Instruction>> {
        let mut instructions = Vec::new();
        for document in serde_yaml::Deserializer::from_slice(bytes) {
            let value = Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }

            let kind = value
                .get("kind")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default();
            if kind == PROVIDER_KIND {
                self.register_provider(value)?;
                continue;
            }

            instructions.push(Instruction::from_document(value)?);
        }
        Ok(instructions)
    }

    fn register_provider(&self, document: Value) -> TemplateResult<()> {
        let spec = self.parser.parse_value(document)?;
        let provider = DynamicProvider::new(spec)?.with_retry_policy(self.retry.clone());
        let registration = self.providers.register(Arc::new(provider));
        if let Some(previous) = registration.replaced {
            debug!(
                component = "template_engine",
                provider = %previous.name(),
                "Closing superseded provider"
            );
            previous.close();
        }
        Ok(())
    }

    /// Render `item` through the views and templates in `instructions` as indented JSON.
    ///
    /// Per-field failures degrade to `null` and are logged; only serialisation
    /// of the final result can fail.
    pub async fn compose(
        &self,
        ctx: &RequestContext,
        item: &Map<String, Value>,
        instructions: &[Instruction],
    ) -> TemplateResult<Vec<u8>> {
        let started = Instant::now();
        self.metrics.compose_started();

        let env = json!({ "item": item, "context": ctx.data() });
        let selected = self.select_templates(&env, instructions);

        let mut result = Map::new();
        for instruction in instructions {
            let InstructionBody::Template { fields } = &instruction.body else {
                continue;
            };
            let Some(name) = instruction.name.as_deref() else {
                continue;
            };
            if selected.contains(name) {
                self.apply_fields(ctx, &env, fields, &mut result).await;
            }
        }

        if result.is_empty() {
            warn!(component = "template_engine", "No combined result");
        }

        let json = serde_json::to_vec_pretty(&Value::Object(result)).map_err(|e| {
            let e = TemplateError::from(e);
            self.metrics.error(e.error_type());
            e
        })?;
        self.metrics.compose_finished(started.elapsed());
        Ok(json)
    }

    /// Names of the templates contributed by every view whose condition holds
    fn select_templates<'a>(
        &self,
        env: &Value,
        instructions: &'a [Instruction],
    ) -> HashSet<&'a str> {
        let mut selected = HashSet::new();
        for instruction in instructions {
            let InstructionBody::View { templates } = &instruction.body else {
                continue;
            };
            if let Some(condition) = &instruction.condition {
                match condition.evaluate(env) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        warn!(
                            component = "template_engine",
                            condition = %condition.source(),
                            error = %e,
                            "Failed to evaluate condition"
                        );
                        continue;
                    }
                }
            }
            selected.extend(templates.iter().map(String::as_str));
        }
        selected
    }

    fn apply_fields<'a>(
        &'a self,
        ctx: &'a RequestContext,
        env: &'a Value,
        fields: &'a [Field],
        target: &'a mut Map<String, Value>,
    ) -> BoxFuture<'a, ()> {
        async move {
            for field in fields {
                self.apply_field(ctx, env, field, target).await;
            }
        }
        .boxed()
    }

    async fn apply_field(
        &self,
        ctx: &RequestContext,
        env: &Value,
        field: &Field,
        target: &mut Map<String, Value>,
    ) {
        let key = field.key.as_str();
        match &field.node {
            FieldNode::Literal(value) => {
                target.insert(key.to_string(), value.clone());
            }
            FieldNode::Bool(value) => {
                target.insert(key.to_string(), Value::Bool(*value));
            }
            FieldNode::Interpolated(template) => {
                let value = match interpolate(template, &env["item"], &env["context"]) {
                    Ok(rendered) => Value::String(rendered),
                    Err(e) => {
                        self.field_failed(key, "interpolation", &e);
                        Value::Null
                    }
                };
                target.insert(key.to_string(), value);
            }
            FieldNode::Path {
                kind,
                source,
                target: path,
            } => {
                if let Some(value) = self.resolve_path(ctx, env, key, *kind, source, path).await {
                    target.insert(key.to_string(), value);
                }
            }
            FieldNode::Object(fields) => {
                let mut nested = Map::new();
                self.apply_fields(ctx, env, fields, &mut nested).await;
                match target.get_mut(key) {
                    Some(Value::Object(existing)) => existing.extend(nested),
                    _ => {
                        target.insert(key.to_string(), Value::Object(nested));
                    }
                }
            }
            FieldNode::Array(elements) => {
                let values = self.apply_array(ctx, env, elements).await;
                target.insert(key.to_string(), Value::Array(values));
            }
            FieldNode::Skip(reason) => {
                debug!(component = "template_engine", key = %key, reason = %reason, "Skipping field");
            }
        }
    }

    async fn apply_array(
        &self,
        ctx: &RequestContext,
        env: &Value,
        elements: &[ArrayElement],
    ) -> Vec<Value> {
        let mut values = Vec::with_capacity(elements.len());
        for element in elements {
            if let Some(condition) = &element.condition {
                if !matches!(condition.evaluate(env), Ok(true)) {
                    continue;
                }
            }
            let mut object = Map::new();
            self.apply_fields(ctx, env, &element.fields, &mut object).await;
            values.push(Value::Object(object));
        }
        values
    }

    /// `None` means the field is omitted (provider filter did not match)
    async fn resolve_path(
        &self,
        ctx: &RequestContext,
        env: &Value,
        key: &str,
        kind: ScalarKind,
        source: &str,
        target: &PathTarget,
    ) -> Option<Value> {
        match target {
            PathTarget::Local(expression) => Some(match expression.evaluate(env) {
                Ok(value) => value,
                Err(e) => {
                    self.path_failed(key, kind, source, "path", &e);
                    Value::Null
                }
            }),
            PathTarget::Invalid(e) => {
                self.path_failed(key, kind, source, "invalid_path", e);
                Some(Value::Null)
            }
            PathTarget::Provider {
                provider,
                method,
                rest,
            } => match self.call_provider(ctx, env, provider, method, rest).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.path_failed(key, kind, source, "provider", &e);
                    Some(Value::Null)
                }
            },
        }
    }

    async fn call_provider(
        &self,
        ctx: &RequestContext,
        env: &Value,
        provider: &str,
        method: &str,
        rest: &Expression,
    ) -> Result<Option<Value>, ProviderError> {
        let provider = self.providers.get(provider)?;
        let response = match provider.execute_method(ctx, method, &env["item"]).await? {
            CallOutcome::Value(response) => response,
            CallOutcome::NoMatch => return Ok(None),
        };
        let scope = json!({ "item": response, "context": env["context"] });
        rest.evaluate(&scope)
            .map(Some)
            .map_err(|e| ProviderError::Decode(format!("response path: {e}")))
    }

    fn path_failed(
        &self,
        key: &str,
        kind: ScalarKind,
        source: &str,
        reason: &'static str,
        error: &dyn std::fmt::Display,
    ) {
        self.metrics.field_failure(reason);
        warn!(
            component = "template_engine",
            key = %key,
            field_type = kind.as_str(),
            path = %source,
            error = %error,
            "Error resolving path"
        );
    }

    fn field_failed(&self, key: &str, reason: &'static str, error: &dyn std::fmt::Display) {
        self.metrics.field_failure(reason);
        warn!(
            component = "template_engine",
            key = %key,
            reason,
            error = %error,
            "Error resolving field"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MethodSpec, Provider, ProviderResult};
    use async_trait::async_trait;
    use serde_json::json;

    fn engine() -> TemplateEngine {
        TemplateEngine::new(Arc::new(ProviderStorage::new()))
    }

    async fn render(engine: &TemplateEngine, yaml: &str, item: Value, context: Value) -> Value {
        let instructions = engine.parse(yaml.as_bytes()).unwrap();
        let ctx = RequestContext::new(context.as_object().cloned().unwrap_or_default());
        let bytes = engine
            .compose(&ctx, item.as_object().unwrap(), &instructions)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_parse_counts_instructions() {
        let yaml = r#"
---
kind: View
metadata:
  name: default-view
spec:
  template:
    templates: ["default-template"]
---
kind: Template
metadata:
  name: default-template
spec:
  greeting:
    type: "string"
    value: "Hello!"
"#;
        assert_eq!(engine().parse(yaml.as_bytes()).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_is_all_or_nothing() {
        let yaml = "kind: Template\nmetadata: {name: a}\n---\nkind: [unclosed\n";
        assert!(matches!(
            engine().parse(yaml.as_bytes()),
            Err(TemplateError::Yaml(_))
        ));
    }

    #[test]
    fn test_provider_document_registers_instead_of_returning() {
        let yaml = r#"
version: v1
kind: ProviderGRPC
metadata:
  name: reaction
spec:
  transport:
    address: localhost:50051
    timeout: 1s
  payload:
    headers:
      x-client: composer
  methods:
    - package: reaction.internal
      service: ReactionInternalService
      method: GetCounters
      type: Item
      timeout: 1s
      request: {}
      response: {}
---
kind: Template
metadata:
  name: t
spec:
  a: 1
"#;
        let engine = engine();
        let instructions = engine.parse(yaml.as_bytes()).unwrap();
        assert_eq!(instructions.len(), 1);
        assert_eq!(engine.providers().names(), vec!["reaction".to_string()]);

        let first = engine.providers().generation("reaction").unwrap();
        engine.parse(yaml.as_bytes()).unwrap();
        assert!(engine.providers().generation("reaction").unwrap() > first);
    }

    #[test]
    fn test_invalid_provider_document_fails_parse() {
        let yaml = "version: v1\nkind: ProviderGRPC\nmetadata:\n  name: broken\n";
        assert!(matches!(
            engine().parse(yaml.as_bytes()),
            Err(TemplateError::Provider(_))
        ));
    }

    #[tokio::test]
    async fn test_simple_interpolation_and_path() {
        let yaml = r#"
kind: View
metadata:
  name: simple-view
spec:
  template:
    templates: ["tmpl1"]
---
kind: Template
metadata:
  name: tmpl1
spec:
  message:
    type: "string"
    value: "Hello, {{item.name}}!"
  code:
    type: "number"
    path: "item.code"
  missing:
    type: "number"
    path: "item.missing"
"#;
        let result = render(&engine(), yaml, json!({"name": "World", "code": 42}), json!({})).await;
        assert_eq!(
            result,
            json!({"message": "Hello, World!", "code": 42, "missing": null})
        );
    }

    #[tokio::test]
    async fn test_no_view_yields_empty_object() {
        let yaml = r#"
kind: Template
metadata:
  name: only-template
spec:
  field: 1
"#;
        assert_eq!(render(&engine(), yaml, json!({}), json!({})).await, json!({}));
    }

    #[tokio::test]
    async fn test_view_conditions_gate_templates() {
        let yaml = r#"
kind: View
spec:
  if: "item.enabled == true"
  template:
    templates: ["enabled"]
---
kind: View
spec:
  if: "item.doesNotExist > 10"
  template:
    templates: ["unknown"]
---
kind: View
spec:
  if: "item.missing == *??"
  template:
    templates: ["broken"]
---
kind: View
spec:
  template:
    templates: ["always"]
---
kind: Template
metadata: {name: enabled}
spec: {enabled: true}
---
kind: Template
metadata: {name: unknown}
spec: {unknown: true}
---
kind: Template
metadata: {name: broken}
spec: {broken: true}
---
kind: Template
metadata: {name: always}
spec: {always: true}
"#;
        let engine = engine();
        let off = render(&engine, yaml, json!({"enabled": false}), json!({})).await;
        assert_eq!(off, json!({"always": true}));
        let on = render(&engine, yaml, json!({"enabled": true}), json!({})).await;
        assert_eq!(on, json!({"always": true, "enabled": true}));
    }

    #[tokio::test]
    async fn test_chained_object_merging() {
        let yaml = r#"
kind: View
spec:
  template:
    templates: ["template1", "template2"]
---
kind: Template
metadata:
  name: template1
spec:
  data1:
    type: object
    value:
      name:
        type: string
        value: "John"
      status:
        type: string
        value: "basic"
---
kind: Template
metadata:
  name: template2
spec:
  data1:
    type: object
    value:
      status:
        type: string
        value: "primary"
"#;
        let result = render(&engine(), yaml, json!({}), json!({})).await;
        assert_eq!(result, json!({"data1": {"name": "John", "status": "primary"}}));
    }

    #[tokio::test]
    async fn test_array_elements_filtered_by_role() {
        let yaml = r#"
kind: View
spec:
  template:
    templates: ["actions"]
---
kind: Template
metadata:
  name: actions
spec:
  buttons:
    type: array
    value:
      - if: "item.role == 'admin'"
        label: Delete
      - if: "item.role == 'user'"
        label:
          type: string
          value: "Report {{ item.name }}"
"#;
        let result = render(&engine(), yaml, json!({"role": "user", "name": "post"}), json!({})).await;
        assert_eq!(result, json!({"buttons": [{"label": "Report post"}]}));
    }

    #[tokio::test]
    async fn test_context_is_visible_to_paths_and_conditions() {
        let yaml = r#"
kind: View
spec:
  if: "context.region == 'eu'"
  template:
    templates: ["regional"]
---
kind: Template
metadata:
  name: regional
spec:
  region:
    type: string
    path: context.region
  greeting:
    type: string
    value: "Hi from {{ context.region }}"
"#;
        let result = render(&engine(), yaml, json!({}), json!({"region": "eu"})).await;
        assert_eq!(result, json!({"region": "eu", "greeting": "Hi from eu"}));
    }

    #[tokio::test]
    async fn test_interpolation_failure_yields_null() {
        let yaml = r#"
kind: View
spec:
  template:
    templates: ["t"]
---
kind: Template
metadata: {name: t}
spec:
  bad:
    type: string
    value: "{{ item.nope"
"#;
        assert_eq!(render(&engine(), yaml, json!({}), json!({})).await, json!({"bad": null}));
    }

    #[tokio::test]
    async fn test_compose_leaves_inputs_untouched() {
        let yaml = r#"
kind: View
spec:
  template:
    templates: ["t"]
---
kind: Template
metadata: {name: t}
spec:
  name: {type: string, path: item.name}
"#;
        let engine = engine();
        let instructions = engine.parse(yaml.as_bytes()).unwrap();
        let snapshot = instructions.clone();
        let item = json!({"name": "x"});
        let ctx = RequestContext::default();
        let a = engine
            .compose(&ctx, item.as_object().unwrap(), &instructions)
            .await
            .unwrap();
        let b = engine
            .compose(&ctx, item.as_object().unwrap(), &instructions)
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(instructions, snapshot);
        assert_eq!(item, json!({"name": "x"}));
    }

    /// Answers every call with the item it was given, under `echo`
    #[derive(Debug)]
    struct EchoProvider {
        skip_type: Option<&'static str>,
    }

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        fn method(&self, name: &str) -> ProviderResult<&MethodSpec> {
            Err(ProviderError::method_not_found("echo", name))
        }

        async fn execute_method(
            &self,
            _ctx: &RequestContext,
            method: &str,
            data: &Value,
        ) -> ProviderResult<CallOutcome> {
            if method != "Get" {
                return Err(ProviderError::method_not_found("echo", method));
            }
            if self.skip_type.is_some() && data.get("type").and_then(Value::as_str) == self.skip_type {
                return Ok(CallOutcome::NoMatch);
            }
            Ok(CallOutcome::Value(json!({ "echo": data })))
        }

        fn close(&self) {}
    }

    #[tokio::test]
    async fn test_provider_paths() {
        let yaml = r#"
kind: View
spec:
  template:
    templates: ["t"]
---
kind: Template
metadata: {name: t}
spec:
  echoed:
    type: string
    path: echo.Get.echo.name
  whole:
    type: number
    path: echo.Get.echo.count
  wrong_method:
    type: string
    path: echo.Nope.value
  unknown_provider:
    type: string
    path: nobody.Get.value
"#;
        let engine = engine();
        engine
            .providers()
            .register(Arc::new(EchoProvider { skip_type: Some("video") }));

        let result = render(
            &engine,
            yaml,
            json!({"name": "alpha", "count": 3, "type": "post"}),
            json!({}),
        )
        .await;
        assert_eq!(
            result,
            json!({
                "echoed": "alpha",
                "whole": 3,
                "wrong_method": null,
                "unknown_provider": null,
            })
        );

        let skipped = render(&engine, yaml, json!({"name": "beta", "type": "video"}), json!({})).await;
        assert_eq!(skipped, json!({"wrong_method": null, "unknown_provider": null}));
    }
}
