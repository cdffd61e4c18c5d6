//! Host -> HLSL translation for `dxcompute` compute programs.
//!
//! The crate is pure data and text processing:
//! - [`known_types`], [`known_members`] and [`keywords`] are the fixed translation tables used
//!   when a program is defined;
//! - [`HlslType`] is the compile-time counterpart of the type table for values uploaded as
//!   constants;
//! - [`layout`] and [`source`] turn captured fields plus a lowered body into an HLSL template
//!   and the reflection data the dispatcher binds against.

mod error;
mod hlsl_type;
mod type_ref;

pub mod keywords;
pub mod known_members;
pub mod known_types;
pub mod layout;
pub mod source;

pub use error::SourceError;
pub use hlsl_type::{Bool, Hlsl, HlslType};
pub use known_types::RegisterClass;
pub use layout::{ConstantBufferLayout, ConstantField};
pub use source::{ResourceBinding, ShaderReflection, ShaderSource, ShaderSourceBuilder, ENTRY_POINT};
pub use type_ref::TypeRef;
