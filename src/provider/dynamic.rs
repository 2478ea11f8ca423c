//! Reflection-driven gRPC provider

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::debug;

use super::errors::{ProviderError, ProviderResult};
use super::retry::RetryPolicy;
use super::schema::{DescriptorPoolResolver, MethodSchema, SchemaResolver};
use super::spec::{MethodSpec, ProviderSpec, SchemaSource};
use super::transport::{GrpcTransport, RpcTransport};
use super::{CallOutcome, Provider};
use crate::context::RequestContext;
use crate::expression::Expression;
use crate::metrics::provider::ProviderMetrics;

/// A method with its filter and request mapping parsed ahead of time
#[derive(Debug)]
struct CompiledMethod {
    spec: MethodSpec,
    filter: Option<Expression>,
    request: Vec<(String, Expression)>,
}

impl CompiledMethod {
    fn compile(spec: &MethodSpec) -> ProviderResult<Self> {
        let filter = spec
            .filter
            .as_deref()
            .map(Expression::parse)
            .transpose()
            .map_err(|e| {
                ProviderError::invalid_spec(format!("method {}: invalid filter: {e}", spec.method))
            })?;

        let request = spec
            .request
            .iter()
            .map(|(field, path)| {
                let expression = Expression::parse(path).map_err(|e| {
                    ProviderError::invalid_spec(format!(
                        "method {}: invalid request mapping {field}: {e}",
                        spec.method
                    ))
                })?;
                Ok((field.clone(), expression))
            })
            .collect::<ProviderResult<Vec<_>>>()?;

        Ok(Self {
            spec: spec.clone(),
            filter,
            request,
        })
    }

    /// The JSON request body: the mapped fields, or `data` itself without a mapping
    fn build_request(&self, data: &Value) -> ProviderResult<Value> {
        if self.request.is_empty() {
            return Ok(data.clone());
        }
        let env = json!({ "item": data });
        let mut body = Map::new();
        for (field, expression) in &self.request {
            let value = expression
                .evaluate(&env)
                .map_err(|e| ProviderError::Encode(format!("request field {field}: {e}")))?;
            body.insert(field.clone(), value);
        }
        Ok(Value::Object(body))
    }
}

/// Environment for method filters: the item plus wall-clock helpers in seconds
fn filter_env(data: &Value) -> Value {
    json!({
        "item": data,
        "time": {
            "Now": chrono::Utc::now().timestamp(),
            "Second": 1,
            "Minute": 60,
            "Hour": 3600,
            "Day": 86400,
        },
    })
}

/// Provider whose wire schema is resolved at runtime
pub struct DynamicProvider {
    spec: ProviderSpec,
    methods: HashMap<String, CompiledMethod>,
    retry: RetryPolicy,
    transport: Arc<dyn RpcTransport>,
    resolver: RwLock<Option<Arc<dyn SchemaResolver>>>,
    schemas: RwLock<HashMap<String, Arc<MethodSchema>>>,
    metrics: ProviderMetrics,
}

impl fmt::Debug for DynamicProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&String> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("DynamicProvider")
            .field("name", &self.spec.name)
            .field("address", &self.spec.transport.address)
            .field("methods", &methods)
            .field("retry", &self.retry)
            .finish()
    }
}

impl DynamicProvider {
    /// Build a provider that talks gRPC to `spec.transport.address`
    pub fn new(spec: ProviderSpec) -> ProviderResult<Self> {
        let transport = GrpcTransport::new(
            spec.transport.address.clone(),
            spec.transport.timeout,
            &spec.headers,
        )?;
        Self::with_transport(spec, Arc::new(transport))
    }

    /// Build a provider over an arbitrary transport
    pub fn with_transport(
        spec: ProviderSpec,
        transport: Arc<dyn RpcTransport>,
    ) -> ProviderResult<Self> {
        let methods = spec
            .methods
            .iter()
            .map(|method| Ok((method.method.clone(), CompiledMethod::compile(method)?)))
            .collect::<ProviderResult<HashMap<_, _>>>()?;

        let provider = Self {
            metrics: ProviderMetrics::new(&spec.name),
            methods,
            retry: RetryPolicy::default(),
            transport,
            resolver: RwLock::new(None),
            schemas: RwLock::new(HashMap::new()),
            spec,
        };

        match provider.spec.schema.clone() {
            Some(SchemaSource::Inline(source)) => provider.attach_proto(&source)?,
            Some(SchemaSource::File(path)) => {
                provider.attach_schema(Arc::new(DescriptorPoolResolver::from_proto_file(&path)?))?
            }
            None => {}
        }
        Ok(provider)
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Whether a schema resolver is attached
    pub fn has_schema(&self) -> bool {
        self.resolver
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    /// Attach a schema resolver, checking every configured method against it.
    ///
    /// On failure the previous resolver stays in place.
    pub fn attach_schema(&self, resolver: Arc<dyn SchemaResolver>) -> ProviderResult<()> {
        let mut resolved = HashMap::with_capacity(self.methods.len());
        for (name, method) in &self.methods {
            let schema = resolver.resolve(&method.spec)?;
            resolved.insert(name.clone(), Arc::new(schema));
        }

        *self.resolver.write().unwrap_or_else(|p| p.into_inner()) = Some(resolver);
        *self.schemas.write().unwrap_or_else(|p| p.into_inner()) = resolved;
        debug!(provider = %self.spec.name, "Attached provider schema");
        Ok(())
    }

    /// Compile `.proto` source and attach it as this provider's schema
    pub fn attach_proto(&self, source: &str) -> ProviderResult<()> {
        let file_name = format!("{}.proto", self.spec.name);
        let resolver = DescriptorPoolResolver::from_proto_source(&file_name, source)?;
        self.attach_schema(Arc::new(resolver))
    }

    fn resolve_schema(&self, method: &CompiledMethod) -> ProviderResult<Arc<MethodSchema>> {
        if let Some(schema) = self
            .schemas
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&method.spec.method)
        {
            return Ok(schema.clone());
        }

        let resolver = self
            .resolver
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| {
                ProviderError::schema(format!(
                    "no schema attached to provider {}",
                    self.spec.name
                ))
            })?;
        let schema = Arc::new(resolver.resolve(&method.spec)?);
        self.schemas
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(method.spec.method.clone(), schema.clone());
        Ok(schema)
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        name: &str,
        data: &Value,
    ) -> ProviderResult<CallOutcome> {
        let method = self
            .methods
            .get(name)
            .ok_or_else(|| ProviderError::method_not_found(&self.spec.name, name))?;

        if let Some(filter) = &method.filter {
            let matched = filter
                .evaluate_condition(&filter_env(data))
                .map_err(|source| ProviderError::Filter {
                    method: name.to_string(),
                    source,
                })?;
            if !matched {
                debug!(provider = %self.spec.name, method = %name, "Filter did not match");
                return Ok(CallOutcome::NoMatch);
            }
        }

        let schema = self.resolve_schema(method)?;
        let request = schema.encode_request(&method.build_request(data)?)?;

        let provider = self.spec.name.as_str();
        let logging = self.spec.transport.logging_enabled;
        let transport = &self.transport;
        let schema_ref = &*schema;
        let metrics = &self.metrics;
        let request_ref = &request;
        let call = self.retry.execute(ctx.cancellation(), move |attempt| {
            if attempt > 1 {
                metrics.retry(name);
            }
            let request = request_ref.clone();
            async move {
                let started = Instant::now();
                let result = transport.unary(schema_ref, request).await;
                if logging {
                    debug!(
                        provider = %provider,
                        method = %name,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        success = result.is_ok(),
                        "Provider call attempt"
                    );
                }
                result
            }
        });

        let timeout = method.spec.timeout;
        let response = tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| ProviderError::Timeout {
                method: name.to_string(),
                timeout,
            })??;

        Ok(CallOutcome::Value(schema.decode_response(&response)?))
    }
}

#[async_trait]
impl Provider for DynamicProvider {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn method(&self, name: &str) -> ProviderResult<&MethodSpec> {
        self.methods
            .get(name)
            .map(|method| &method.spec)
            .ok_or_else(|| ProviderError::method_not_found(&self.spec.name, name))
    }

    async fn execute_method(
        &self,
        ctx: &RequestContext,
        method: &str,
        data: &Value,
    ) -> ProviderResult<CallOutcome> {
        let started = Instant::now();
        let result = self.execute(ctx, method, data).await;
        let outcome = match &result {
            Ok(CallOutcome::Value(_)) => "success",
            Ok(CallOutcome::NoMatch) => "no_match",
            Err(ProviderError::Timeout { .. }) => "timeout",
            Err(ProviderError::Cancelled) => "cancelled",
            Err(_) => "error",
        };
        self.metrics.call(method, outcome, started.elapsed());
        if let Err(e) = &result {
            debug!(provider = %self.spec.name, method = %method, error = %e, "Provider call failed");
        }
        result
    }

    fn close(&self) {
        self.transport.close();
    }
}
