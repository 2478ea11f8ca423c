//! # Templates
//!
//! Template sources are multi-document YAML streams. `View` documents pick
//! which named `Template` documents apply to an item (optionally gated by an
//! `if` condition); `Template` documents contribute fields to the result.
//!
//! ```yaml
//! kind: View
//! version: v1
//! spec:
//!   if: item.type == "post"
//!   template:
//!     templates: [card, stats]
//! ---
//! kind: Template
//! version: v1
//! metadata:
//!   name: card
//! spec:
//!   title:  { type: string, value: "{{ item.title }}" }
//!   likes:  { type: number, path: reaction.GetCounters.counters[0].likes }
//!   author: { type: object, value: { name: { type: string, path: item.author } } }
//! ```
//!
//! Templates merge in declaration order: later templates win per key, and
//! objects under the same key are unioned one level deep.

mod engine;
mod errors;
mod instruction;
mod interpolate;

pub use engine::TemplateEngine;
pub use errors::{TemplateError, TemplateResult};
pub use instruction::{
    ArrayElement, Condition, Field, FieldNode, Instruction, InstructionBody, InstructionKind,
    PathTarget, ScalarKind,
};
pub use interpolate::interpolate;
