//! # Item Composer
//!
//! Renders a JSON view of a business item by composing declarative templates.
//! Individual fields may be pulled from external gRPC services that are
//! described entirely by configuration; their message shapes are resolved at
//! runtime from `.proto` sources, with no generated client code.
//!
//! ## Layout
//!
//! - [`cache`]: generic refreshable cache with background and LRU eviction
//! - [`expression`]: the embedded condition/path language
//! - [`template`]: template document parsing and per-item composition
//! - [`provider`]: provider registry, dynamic gRPC provider and retry policy
//! - [`repository`]: storage backends wired to a template cache
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use item_composer::context::RequestContext;
//! use item_composer::provider::ProviderStorage;
//! use item_composer::template::TemplateEngine;
//!
//! # async fn render() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = TemplateEngine::new(Arc::new(ProviderStorage::new()));
//! let instructions = engine.parse(br#"
//! kind: View
//! version: v1
//! spec:
//!   template:
//!     templates: [card]
//! ---
//! kind: Template
//! version: v1
//! metadata:
//!   name: card
//! spec:
//!   title:
//!     type: string
//!     value: "Hello, {{ item.name }}!"
//! "#)?;
//!
//! let item = serde_json::json!({"name": "World"});
//! let json = engine
//!     .compose(&RequestContext::default(), item.as_object().unwrap(), &instructions)
//!     .await?;
//! println!("{}", String::from_utf8(json)?);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod errors;
pub mod expression;
pub mod logging;
pub mod metrics;
pub mod provider;
pub mod repository;
pub mod template;

pub use context::RequestContext;
pub use errors::{ComposerError, ComposerResult};
