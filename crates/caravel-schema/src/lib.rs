//! Manifest parsing and the resource model for Caravel.
//!
//! This crate defines the schema layer: JSON manifest parsing into a typed,
//! validated [`Manifest`], the closed set of resource kinds, network binding
//! declarations, and the [`ExternalOverrides`] snapshot callers use to flag
//! bindings for public ingress without mutating the parsed document.

pub mod manifest;
pub mod overrides;
pub mod types;

pub use manifest::{
    parse_manifest_bytes, parse_manifest_str, Binding, Manifest, ManifestError, Resource,
    ResourceKind,
};
pub use overrides::ExternalOverrides;
pub use types::{BindingName, ResourceName};
