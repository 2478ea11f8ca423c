//! RPC transports for dynamic providers

use async_trait::async_trait;
use prost_reflect::DynamicMessage;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};
use tracing::debug;

use super::codec::DynamicCodec;
use super::errors::{ProviderError, ProviderResult};
use super::schema::MethodSchema;

/// Carries one unary call to a backend
#[async_trait]
pub trait RpcTransport: Send + Sync + fmt::Debug {
    async fn unary(
        &self,
        schema: &MethodSchema,
        request: DynamicMessage,
    ) -> Result<DynamicMessage, Status>;

    /// Release the underlying connection
    fn close(&self);
}

/// tonic channel transport; the channel is created on first use
pub struct GrpcTransport {
    address: String,
    connect_timeout: Duration,
    metadata: MetadataMap,
    channel: Mutex<Option<Channel>>,
}

impl fmt::Debug for GrpcTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcTransport")
            .field("address", &self.address)
            .field("connect_timeout", &self.connect_timeout)
            .field("headers", &self.metadata.len())
            .finish()
    }
}

impl GrpcTransport {
    pub fn new(
        address: impl Into<String>,
        connect_timeout: Duration,
        headers: &BTreeMap<String, String>,
    ) -> ProviderResult<Self> {
        let mut metadata = MetadataMap::new();
        for (key, value) in headers {
            let key = AsciiMetadataKey::from_bytes(key.to_ascii_lowercase().as_bytes())
                .map_err(|e| ProviderError::invalid_spec(format!("invalid header {key}: {e}")))?;
            let value = AsciiMetadataValue::try_from(value.as_str()).map_err(|e| {
                ProviderError::invalid_spec(format!("invalid value for header {key}: {e}"))
            })?;
            metadata.insert(key, value);
        }

        Ok(Self {
            address: address.into(),
            connect_timeout,
            metadata,
            channel: Mutex::new(None),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn channel(&self) -> Result<Channel, Status> {
        let mut guard = self.channel.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(channel) = guard.as_ref() {
            return Ok(channel.clone());
        }

        let uri = if self.address.contains("://") {
            self.address.clone()
        } else {
            format!("http://{}", self.address)
        };
        let channel = Endpoint::from_shared(uri)
            .map_err(|e| Status::invalid_argument(format!("invalid address: {e}")))?
            .connect_timeout(self.connect_timeout)
            .connect_lazy();
        debug!(address = %self.address, "Created provider channel");
        *guard = Some(channel.clone());
        Ok(channel)
    }
}

#[async_trait]
impl RpcTransport for GrpcTransport {
    async fn unary(
        &self,
        schema: &MethodSchema,
        request: DynamicMessage,
    ) -> Result<DynamicMessage, Status> {
        let mut client = tonic::client::Grpc::new(self.channel()?);
        client
            .ready()
            .await
            .map_err(|e| Status::unavailable(format!("service was not ready: {e}")))?;

        let path: PathAndQuery = schema
            .path()
            .parse()
            .map_err(|e| Status::internal(format!("invalid method path: {e}")))?;

        let mut request = Request::new(request);
        *request.metadata_mut() = self.metadata.clone();

        let response = client
            .unary(request, path, DynamicCodec::new(schema.output().clone()))
            .await?;
        Ok(response.into_inner())
    }

    fn close(&self) {
        let mut guard = self.channel.lock().unwrap_or_else(|p| p.into_inner());
        if guard.take().is_some() {
            debug!(address = %self.address, "Closed provider channel");
        }
    }
}
