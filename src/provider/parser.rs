//! Provider document parsing and validation

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use super::errors::{ProviderError, ProviderResult};
use super::spec::{
    DocumentMethod, MethodKind, MethodSpec, ProviderDocument, ProviderSpec, RawDuration,
    SchemaSource, TransportSpec, PROVIDER_KIND,
};

static FILTER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[a-zA-Z0-9\s\.\(\)\+\-\*/><=!&|:"',\[\]\{\}_]+$"#).unwrap()
});

static MAPPING_VALUE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^[a-zA-Z0-9\._\[\]"']+$"#).unwrap());

static ENV_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// Turns provider documents into validated [`ProviderSpec`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderSpecParser;

impl ProviderSpecParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a single YAML (or JSON) provider document
    pub fn parse(&self, bytes: &[u8]) -> ProviderResult<ProviderSpec> {
        let document: ProviderDocument = serde_yaml::from_slice(bytes)
            .map_err(|e| ProviderError::Document(e.to_string()))?;
        self.build(document)
    }

    /// Parse a document that was already decoded into a JSON value
    pub fn parse_value(&self, value: Value) -> ProviderResult<ProviderSpec> {
        let document: ProviderDocument =
            serde_json::from_value(value).map_err(|e| ProviderError::Document(e.to_string()))?;
        self.build(document)
    }

    fn build(&self, document: ProviderDocument) -> ProviderResult<ProviderSpec> {
        self.validate(&document)?;

        let transport_timeout = positive_duration(document.spec.transport.timeout.as_ref())
            .map_err(|e| ProviderError::invalid_spec(format!("transport timeout {e}")))?;

        let headers = document
            .spec
            .payload
            .headers
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| Ok((key, expand_env(&value)?)))
            .collect::<ProviderResult<BTreeMap<_, _>>>()?;

        let methods = document
            .spec
            .methods
            .into_iter()
            .enumerate()
            .map(|(i, method)| build_method(i, method))
            .collect::<ProviderResult<Vec<_>>>()?;

        let schema = document.spec.schema.and_then(|schema| {
            match (schema.proto, schema.proto_file) {
                (Some(source), _) if !source.trim().is_empty() => Some(SchemaSource::Inline(source)),
                (_, Some(path)) if !path.trim().is_empty() => {
                    Some(SchemaSource::File(PathBuf::from(path)))
                }
                _ => None,
            }
        });

        Ok(ProviderSpec {
            version: document.version,
            name: document.metadata.name,
            labels: document.metadata.labels,
            transport: TransportSpec {
                address: document.spec.transport.address,
                timeout: transport_timeout,
                logging_enabled: document.spec.transport.logging.enabled,
            },
            headers,
            methods,
            schema,
        })
    }

    /// Check a raw document against the provider document rules
    pub fn validate(&self, document: &ProviderDocument) -> ProviderResult<()> {
        if document.version.trim().is_empty() {
            return Err(ProviderError::invalid_spec("version is required"));
        }
        if document.kind.trim() != PROVIDER_KIND {
            return Err(ProviderError::invalid_spec(format!(
                "kind must be {PROVIDER_KIND}, got {:?}",
                document.kind
            )));
        }
        if document.metadata.name.trim().is_empty() {
            return Err(ProviderError::invalid_spec("metadata.name is required"));
        }

        let transport = &document.spec.transport;
        if transport.address.trim().is_empty() {
            return Err(ProviderError::invalid_spec("transport address is required"));
        }
        positive_duration(transport.timeout.as_ref())
            .map_err(|e| ProviderError::invalid_spec(format!("transport timeout {e}")))?;

        let headers = document
            .spec
            .payload
            .headers
            .as_ref()
            .ok_or_else(|| ProviderError::invalid_spec("payload headers are required"))?;
        for (key, value) in headers {
            if key.trim().is_empty() {
                return Err(ProviderError::invalid_spec("header key must not be empty"));
            }
            for captures in ENV_PLACEHOLDER.captures_iter(value) {
                let var = &captures[1];
                if std::env::var(var).is_err() {
                    return Err(ProviderError::invalid_spec(format!(
                        "header {key} references unset environment variable {var}"
                    )));
                }
            }
        }

        if document.spec.methods.is_empty() {
            return Err(ProviderError::invalid_spec("at least one method is required"));
        }
        for (i, method) in document.spec.methods.iter().enumerate() {
            validate_method(i, method)?;
        }

        if let Some(schema) = &document.spec.schema {
            if schema.proto.is_some() && schema.proto_file.is_some() {
                return Err(ProviderError::invalid_spec(
                    "schema must set either proto or proto_file, not both",
                ));
            }
        }

        Ok(())
    }
}

fn validate_method(i: usize, method: &DocumentMethod) -> ProviderResult<()> {
    let required = [
        ("package", &method.package),
        ("service", &method.service),
        ("method", &method.method),
        ("type", &method.kind),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(ProviderError::invalid_spec(format!(
                "method[{i}]: {field} is required"
            )));
        }
    }
    if MethodKind::parse(method.kind.trim()).is_none() {
        return Err(ProviderError::invalid_spec(format!(
            "method[{i}]: type must be one of Batch, DomainBatch, Item, got {:?}",
            method.kind
        )));
    }
    positive_duration(method.timeout.as_ref())
        .map_err(|e| ProviderError::invalid_spec(format!("method[{i}]: timeout {e}")))?;

    let filter = method.filter.condition.trim();
    if !filter.is_empty() && !FILTER_PATTERN.is_match(filter) {
        return Err(ProviderError::invalid_spec(format!(
            "method[{i}]: filter contains unsupported characters"
        )));
    }

    for (section, mapping) in [("request", &method.request), ("response", &method.response)] {
        let mapping = mapping.as_ref().ok_or_else(|| {
            ProviderError::invalid_spec(format!("method[{i}]: {section} mapping is required"))
        })?;
        for (key, value) in mapping {
            if key.trim().is_empty() {
                return Err(ProviderError::invalid_spec(format!(
                    "method[{i}]: {section} key must not be empty"
                )));
            }
            if !MAPPING_VALUE_PATTERN.is_match(value) {
                return Err(ProviderError::invalid_spec(format!(
                    "method[{i}]: {section}.{key} has invalid value {value:?}"
                )));
            }
        }
    }

    Ok(())
}

fn build_method(i: usize, method: DocumentMethod) -> ProviderResult<MethodSpec> {
    let kind = MethodKind::parse(method.kind.trim()).ok_or_else(|| {
        ProviderError::invalid_spec(format!("method[{i}]: unknown type {:?}", method.kind))
    })?;
    let timeout = positive_duration(method.timeout.as_ref())
        .map_err(|e| ProviderError::invalid_spec(format!("method[{i}]: timeout {e}")))?;
    let filter = Some(method.filter.condition.trim().to_string()).filter(|f| !f.is_empty());

    Ok(MethodSpec {
        package: method.package.trim().to_string(),
        service: method.service.trim().to_string(),
        method: method.method.trim().to_string(),
        kind,
        timeout,
        filter,
        request: method.request.unwrap_or_default(),
        response: method.response.unwrap_or_default(),
    })
}

fn positive_duration(raw: Option<&RawDuration>) -> Result<Duration, String> {
    let raw = raw.ok_or_else(|| "is required".to_string())?;
    let nanos = raw.to_nanos()?;
    if nanos <= 0 {
        return Err("must be positive".to_string());
    }
    let nanos = u64::try_from(nanos).map_err(|_| "is too large".to_string())?;
    Ok(Duration::from_nanos(nanos))
}

/// Replace every `${VAR}` with the value of the environment variable
fn expand_env(value: &str) -> ProviderResult<String> {
    let mut missing = None;
    let expanded = ENV_PLACEHOLDER.replace_all(value, |captures: &regex::Captures<'_>| {
        match std::env::var(&captures[1]) {
            Ok(resolved) => resolved,
            Err(_) => {
                missing.get_or_insert_with(|| captures[1].to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(var) => Err(ProviderError::invalid_spec(format!(
            "environment variable {var} is not set"
        ))),
        None => Ok(expanded.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const REACTION_PROVIDER: &str = r#"
version: v1
kind: ProviderGRPC
metadata:
  name: reaction
  labels:
    team: social
spec:
  transport:
    address: localhost:50051
    timeout: 1s
    logging:
      enabled: true
  payload:
    headers:
      x-api-key: "${COMPOSER_TEST_API_KEY}"
      x-client: composer
  methods:
    - package: reaction.internal
      service: ReactionInternalService
      method: GetReactionCountersByDomainId
      type: DomainBatch
      timeout: 500ms
      filter:
        if: item.type == "post" && item.createdAt > time.Now - 7 * time.Day
      request:
        domain: item.type
        domain_ids: "item.id"
      response:
        itemId: item_id
"#;

    fn set_api_key() {
        std::env::set_var("COMPOSER_TEST_API_KEY", "secret-key");
    }

    fn document() -> serde_yaml::Value {
        serde_yaml::from_str(REACTION_PROVIDER).unwrap()
    }

    fn parse_modified(edit: impl FnOnce(&mut serde_yaml::Value)) -> ProviderResult<ProviderSpec> {
        let mut doc = document();
        edit(&mut doc);
        let bytes = serde_yaml::to_string(&doc).unwrap();
        ProviderSpecParser::new().parse(bytes.as_bytes())
    }

    #[test]
    #[serial]
    fn test_parse_reaction_provider() {
        set_api_key();
        let spec = ProviderSpecParser::new()
            .parse(REACTION_PROVIDER.as_bytes())
            .unwrap();

        assert_eq!(spec.name, "reaction");
        assert_eq!(spec.labels.get("team").map(String::as_str), Some("social"));
        assert_eq!(spec.transport.address, "localhost:50051");
        assert_eq!(spec.transport.timeout, Duration::from_secs(1));
        assert!(spec.transport.logging_enabled);
        assert_eq!(spec.headers["x-api-key"], "secret-key");
        assert_eq!(spec.headers["x-client"], "composer");

        let method = spec.method("GetReactionCountersByDomainId").unwrap();
        assert_eq!(method.kind, MethodKind::DomainBatch);
        assert_eq!(method.timeout, Duration::from_millis(500));
        assert_eq!(method.request["domain"], "item.type");
        assert_eq!(method.response["itemId"], "item_id");
        assert!(method.filter.as_deref().unwrap().starts_with("item.type"));
        assert!(spec.schema.is_none());
    }

    #[test]
    #[serial]
    fn test_parse_value_matches_yaml() {
        set_api_key();
        let value: Value = serde_yaml::from_str(REACTION_PROVIDER).unwrap();
        let from_value = ProviderSpecParser::new().parse_value(value).unwrap();
        let from_yaml = ProviderSpecParser::new()
            .parse(REACTION_PROVIDER.as_bytes())
            .unwrap();
        assert_eq!(from_value, from_yaml);
    }

    #[test]
    #[serial]
    fn test_unset_header_variable_is_rejected() {
        std::env::remove_var("COMPOSER_TEST_API_KEY");
        let err = ProviderSpecParser::new()
            .parse(REACTION_PROVIDER.as_bytes())
            .unwrap_err();
        assert!(err.to_string().contains("COMPOSER_TEST_API_KEY"));
    }

    #[test]
    #[serial]
    fn test_rejects_wrong_kind() {
        set_api_key();
        let err = parse_modified(|doc| doc["kind"] = "View".into()).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidSpec(_)));
    }

    #[test]
    #[serial]
    fn test_rejects_missing_address() {
        set_api_key();
        let err = parse_modified(|doc| doc["spec"]["transport"]["address"] = "".into())
            .unwrap_err();
        assert!(err.to_string().contains("address"));
    }

    #[test]
    #[serial]
    fn test_rejects_non_positive_timeouts() {
        set_api_key();
        let err = parse_modified(|doc| doc["spec"]["transport"]["timeout"] = "0s".into())
            .unwrap_err();
        assert!(err.to_string().contains("must be positive"));

        let err = parse_modified(|doc| doc["spec"]["methods"][0]["timeout"] = "-1s".into())
            .unwrap_err();
        assert!(err.to_string().contains("method[0]"));
    }

    #[test]
    #[serial]
    fn test_rejects_unknown_method_type() {
        set_api_key();
        let err = parse_modified(|doc| doc["spec"]["methods"][0]["type"] = "Stream".into())
            .unwrap_err();
        assert!(err.to_string().contains("type must be one of"));
    }

    #[test]
    #[serial]
    fn test_rejects_filter_with_unsupported_characters() {
        set_api_key();
        let err = parse_modified(|doc| {
            doc["spec"]["methods"][0]["filter"]["if"] = "item.id; drop".into()
        })
        .unwrap_err();
        assert!(err.to_string().contains("filter"));
    }

    #[test]
    #[serial]
    fn test_rejects_missing_mappings_and_bad_values() {
        set_api_key();
        let err = parse_modified(|doc| {
            doc["spec"]["methods"][0]
                .as_mapping_mut()
                .unwrap()
                .remove("response");
        })
        .unwrap_err();
        assert!(err.to_string().contains("response mapping is required"));

        let err = parse_modified(|doc| {
            doc["spec"]["methods"][0]["request"]["domain"] = "item type".into()
        })
        .unwrap_err();
        assert!(err.to_string().contains("request.domain"));
    }

    #[test]
    #[serial]
    fn test_rejects_missing_headers_and_methods() {
        set_api_key();
        let err = parse_modified(|doc| {
            doc["spec"]["payload"]
                .as_mapping_mut()
                .unwrap()
                .remove("headers");
        })
        .unwrap_err();
        assert!(err.to_string().contains("headers"));

        let err = parse_modified(|doc| doc["spec"]["methods"] = serde_yaml::Value::Sequence(vec![]))
            .unwrap_err();
        assert!(err.to_string().contains("at least one method"));
    }

    #[test]
    #[serial]
    fn test_schema_source_selection() {
        set_api_key();
        let spec = parse_modified(|doc| {
            doc["spec"]["schema"] = serde_yaml::from_str("proto_file: protos/reaction.proto").unwrap()
        })
        .unwrap();
        assert_eq!(
            spec.schema,
            Some(SchemaSource::File(PathBuf::from("protos/reaction.proto")))
        );

        let err = parse_modified(|doc| {
            doc["spec"]["schema"] =
                serde_yaml::from_str("{proto: 'syntax = \"proto3\";', proto_file: a.proto}").unwrap()
        })
        .unwrap_err();
        assert!(err.to_string().contains("not both"));
    }
}
