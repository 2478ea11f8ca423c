//! Runtime schema resolution for provider methods.
//!
//! A [`SchemaResolver`] turns a [`MethodSpec`] into a [`MethodSchema`]: the
//! request/response message descriptors plus the RPC path. Message shapes are
//! never compiled into the binary; they come from `.proto` sources compiled at
//! runtime with `protox`, or from a precompiled `FileDescriptorSet`.

use prost_reflect::{
    DescriptorPool, DynamicMessage, MessageDescriptor, MethodDescriptor, SerializeOptions,
};
use protox::file::{ChainFileResolver, File, FileResolver, GoogleFileResolver};
use serde_json::Value;
use std::fmt;
use std::path::Path;

use super::errors::{ProviderError, ProviderResult};
use super::spec::MethodSpec;

/// Resolves wire schemas for provider methods
pub trait SchemaResolver: Send + Sync + fmt::Debug {
    fn resolve(&self, method: &MethodSpec) -> ProviderResult<MethodSchema>;
}

/// Encode/decode capability for one RPC method
#[derive(Debug, Clone)]
pub struct MethodSchema {
    path: String,
    input: MessageDescriptor,
    output: MessageDescriptor,
}

impl MethodSchema {
    pub fn from_descriptor(method: &MethodDescriptor) -> Self {
        Self {
            path: format!("/{}/{}", method.parent_service().full_name(), method.name()),
            input: method.input(),
            output: method.output(),
        }
    }

    /// gRPC request path, `/package.Service/Method`
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn input(&self) -> &MessageDescriptor {
        &self.input
    }

    pub fn output(&self) -> &MessageDescriptor {
        &self.output
    }

    /// Build a request message from a JSON value using the protobuf JSON mapping
    pub fn encode_request(&self, value: &Value) -> ProviderResult<DynamicMessage> {
        DynamicMessage::deserialize(self.input.clone(), value).map_err(|e| {
            ProviderError::Encode(format!("{}: {e}", self.input.full_name()))
        })
    }

    /// Convert a response message back into a JSON value.
    ///
    /// 64-bit integers stay JSON numbers so templates can use them as `number` fields.
    pub fn decode_response(&self, message: &DynamicMessage) -> ProviderResult<Value> {
        let options = SerializeOptions::new().stringify_64_bit_integers(false);
        message
            .serialize_with_options(serde_json::value::Serializer, &options)
            .map_err(|e| ProviderError::Decode(format!("{}: {e}", self.output.full_name())))
    }
}

/// Schema resolver backed by a protobuf descriptor pool
#[derive(Debug, Clone)]
pub struct DescriptorPoolResolver {
    pool: DescriptorPool,
}

impl DescriptorPoolResolver {
    pub fn new(pool: DescriptorPool) -> Self {
        Self { pool }
    }

    /// Compile inline `.proto` source; `name` is the virtual file name used in errors
    pub fn from_proto_source(name: &str, source: &str) -> ProviderResult<Self> {
        let mut resolver = ChainFileResolver::new();
        resolver.add(InlineFileResolver {
            name: name.to_string(),
            source: source.to_string(),
        });
        resolver.add(GoogleFileResolver::new());

        let mut compiler = protox::Compiler::with_file_resolver(resolver);
        compiler.include_imports(true);
        compiler
            .open_file(name)
            .map_err(|e| ProviderError::schema(format!("failed to compile {name}: {e}")))?;
        Ok(Self::new(compiler.descriptor_pool()))
    }

    /// Compile a `.proto` file; imports resolve relative to its directory
    pub fn from_proto_file(path: &Path) -> ProviderResult<Self> {
        let include = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut compiler = protox::Compiler::new([include])
            .map_err(|e| ProviderError::schema(format!("invalid include path: {e}")))?;
        compiler.include_imports(true);
        compiler.open_file(path).map_err(|e| {
            ProviderError::schema(format!("failed to compile {}: {e}", path.display()))
        })?;
        Ok(Self::new(compiler.descriptor_pool()))
    }

    /// Load an encoded `FileDescriptorSet`
    pub fn from_descriptor_set(bytes: &[u8]) -> ProviderResult<Self> {
        let pool = DescriptorPool::decode(bytes)
            .map_err(|e| ProviderError::schema(format!("invalid descriptor set: {e}")))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }
}

impl SchemaResolver for DescriptorPoolResolver {
    fn resolve(&self, method: &MethodSpec) -> ProviderResult<MethodSchema> {
        let service_name = method.service_full_name();
        let service = self
            .pool
            .get_service_by_name(&service_name)
            .ok_or_else(|| ProviderError::schema(format!("service {service_name} not found")))?;
        let descriptor = service
            .methods()
            .find(|m| m.name() == method.method)
            .ok_or_else(|| {
                ProviderError::schema(format!(
                    "method {} not found in service {service_name}",
                    method.method
                ))
            })?;
        Ok(MethodSchema::from_descriptor(&descriptor))
    }
}

/// Serves one in-memory `.proto` file to the compiler
#[derive(Debug)]
struct InlineFileResolver {
    name: String,
    source: String,
}

impl FileResolver for InlineFileResolver {
    fn resolve_path(&self, path: &Path) -> Option<String> {
        (path == Path::new(&self.name)).then(|| self.name.clone())
    }

    fn open_file(&self, name: &str) -> Result<File, protox::Error> {
        if name == self.name {
            File::from_source(name, &self.source)
        } else {
            Err(protox::Error::file_not_found(name))
        }
    }
}
