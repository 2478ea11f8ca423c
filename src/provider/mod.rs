//! # Providers
//!
//! Named RPC backends described entirely by configuration. A provider
//! document (`kind: ProviderGRPC`) is validated by [`ProviderSpecParser`],
//! turned into a [`DynamicProvider`] and registered in a shared
//! [`ProviderStorage`]. Calls build their wire messages through protobuf
//! reflection, so no client code is generated for the backends.
//!
//! ```text
//! ProviderStorage ──get(name)──▶ DynamicProvider
//!                                   │ filter (expression over {item, time})
//!                                   │ schema (SchemaResolver, cached per method)
//!                                   │ retry  (RetryPolicy, cancellable)
//!                                   ▼
//!                               RpcTransport (GrpcTransport / test doubles)
//! ```

mod codec;
mod dynamic;
mod errors;
mod parser;
mod retry;
mod schema;
mod spec;
mod storage;
mod transport;

pub use codec::DynamicCodec;
pub use dynamic::DynamicProvider;
pub use errors::{ProviderError, ProviderResult};
pub use parser::ProviderSpecParser;
pub use retry::{parse_code, RetryPolicy};
pub use schema::{DescriptorPoolResolver, MethodSchema, SchemaResolver};
pub use spec::{
    parse_go_duration, MethodKind, MethodSpec, ProviderDocument, ProviderSpec, SchemaSource,
    TransportSpec, PROVIDER_KIND,
};
pub use storage::{ProviderStorage, Registration};
pub use transport::{GrpcTransport, RpcTransport};

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

use crate::context::RequestContext;

/// Result of a provider method call
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// The decoded response
    Value(Value),
    /// The method's filter rejected the item; the caller omits the field
    NoMatch,
}

impl CallOutcome {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::NoMatch => None,
        }
    }
}

/// A named backend that can execute configured methods
#[async_trait]
pub trait Provider: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn method(&self, name: &str) -> ProviderResult<&MethodSpec>;

    async fn execute_method(
        &self,
        ctx: &RequestContext,
        method: &str,
        data: &Value,
    ) -> ProviderResult<CallOutcome>;

    /// Release connections; the registry owner decides when
    fn close(&self);
}
