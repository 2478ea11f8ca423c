//! Provider document model.
//!
//! [`ProviderDocument`] mirrors the YAML as written (everything optional so
//! validation can report precisely what is missing); [`ProviderSpec`] is the
//! validated, typed form a provider is built from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Document kind that marks a provider specification
pub const PROVIDER_KIND: &str = "ProviderGRPC";

// ---------------------------------------------------------------------------
// Raw document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderDocument {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub spec: DocumentSpec,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DocumentSpec {
    #[serde(default)]
    pub transport: DocumentTransport,
    #[serde(default)]
    pub payload: DocumentPayload,
    #[serde(default)]
    pub methods: Vec<DocumentMethod>,
    #[serde(default)]
    pub schema: Option<DocumentSchema>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DocumentTransport {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub timeout: Option<RawDuration>,
    #[serde(default)]
    pub logging: DocumentLogging,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DocumentLogging {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DocumentPayload {
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DocumentMethod {
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub timeout: Option<RawDuration>,
    #[serde(default)]
    pub filter: DocumentFilter,
    #[serde(default)]
    pub request: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub response: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DocumentFilter {
    #[serde(default, rename = "if")]
    pub condition: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DocumentSchema {
    /// Inline `.proto` source
    #[serde(default)]
    pub proto: Option<String>,
    /// Path to a `.proto` file; imports resolve relative to its directory
    #[serde(default)]
    pub proto_file: Option<String>,
}

/// A duration as written: Go-style text (`"1s"`, `"1m30s"`) or integer nanoseconds
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawDuration {
    Nanos(i64),
    Text(String),
}

impl RawDuration {
    /// Resolve to a signed nanosecond count
    pub fn to_nanos(&self) -> Result<i128, String> {
        match self {
            Self::Nanos(n) => Ok(i128::from(*n)),
            Self::Text(text) => parse_go_duration(text),
        }
    }
}

/// Parse a Go `time.Duration` string into signed nanoseconds
pub fn parse_go_duration(text: &str) -> Result<i128, String> {
    let text = text.trim();
    let (negative, mut rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    if rest == "0" {
        return Ok(0);
    }
    if rest.is_empty() {
        return Err(format!("invalid duration {text:?}"));
    }

    let mut total: f64 = 0.0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("invalid duration {text:?}"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid duration {text:?}"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(format!("missing unit in duration {text:?}")),
            unit => return Err(format!("unknown unit {unit:?} in duration {text:?}")),
        };
        rest = &rest[unit_len..];
        total += value * nanos_per_unit;
    }

    let nanos = total.round() as i128;
    Ok(if negative { -nanos } else { nanos })
}

// ---------------------------------------------------------------------------
// Validated spec
// ---------------------------------------------------------------------------

/// How a method relates items to calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodKind {
    Batch,
    DomainBatch,
    Item,
}

impl MethodKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Batch" => Some(Self::Batch),
            "DomainBatch" => Some(Self::DomainBatch),
            "Item" => Some(Self::Item),
            _ => None,
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Batch => "Batch",
            Self::DomainBatch => "DomainBatch",
            Self::Item => "Item",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportSpec {
    pub address: String,
    /// Connect timeout for the channel
    pub timeout: Duration,
    pub logging_enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodSpec {
    pub package: String,
    pub service: String,
    pub method: String,
    pub kind: MethodKind,
    /// Deadline for one execution, retries included
    pub timeout: Duration,
    pub filter: Option<String>,
    /// Wire field name to expression over `item`
    pub request: BTreeMap<String, String>,
    pub response: BTreeMap<String, String>,
}

impl MethodSpec {
    /// Fully qualified service name, e.g. `reaction.internal.ReactionInternalService`
    pub fn service_full_name(&self) -> String {
        if self.package.is_empty() {
            self.service.clone()
        } else {
            format!("{}.{}", self.package, self.service)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaSource {
    Inline(String),
    File(PathBuf),
}

/// A validated provider specification with placeholders resolved
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSpec {
    pub version: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub transport: TransportSpec,
    pub headers: BTreeMap<String, String>,
    pub methods: Vec<MethodSpec>,
    pub schema: Option<SchemaSource>,
}

impl ProviderSpec {
    pub fn method(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.iter().find(|m| m.method == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_go_durations() {
        assert_eq!(parse_go_duration("1s"), Ok(1_000_000_000));
        assert_eq!(parse_go_duration("250ms"), Ok(250_000_000));
        assert_eq!(parse_go_duration("1m30s"), Ok(90_000_000_000));
        assert_eq!(parse_go_duration("1.5h"), Ok(5_400_000_000_000));
        assert_eq!(parse_go_duration("10us"), Ok(10_000));
        assert_eq!(parse_go_duration("0"), Ok(0));
        assert_eq!(parse_go_duration("-2s"), Ok(-2_000_000_000));
    }

    #[test]
    fn test_parse_go_duration_rejects_garbage() {
        assert!(parse_go_duration("").is_err());
        assert!(parse_go_duration("10").is_err());
        assert!(parse_go_duration("5 days").is_err());
        assert!(parse_go_duration("s").is_err());
    }

    #[test]
    fn test_raw_duration_accepts_text_and_integers() {
        let text: RawDuration = serde_json::from_str(r#""2s""#).unwrap();
        let nanos: RawDuration = serde_json::from_str("1500").unwrap();
        assert_eq!(text.to_nanos(), Ok(2_000_000_000));
        assert_eq!(nanos.to_nanos(), Ok(1500));
    }

    #[test]
    fn test_service_full_name() {
        let method = MethodSpec {
            package: "reaction.internal".to_string(),
            service: "ReactionInternalService".to_string(),
            method: "GetReactionCountersByDomainId".to_string(),
            kind: MethodKind::DomainBatch,
            timeout: Duration::from_secs(1),
            filter: None,
            request: BTreeMap::new(),
            response: BTreeMap::new(),
        };
        assert_eq!(
            method.service_full_name(),
            "reaction.internal.ReactionInternalService"
        );
    }
}
