//! Manifest resolution and artifact generation engine for Caravel.
//!
//! This crate turns a parsed topology manifest into deployable artifacts:
//! reference expression resolution (`expr`), the resource dependency graph
//! with cycle rejection (`graph`), per-resource container deployment
//! descriptors (`containerapp`), and the dependency-ordered infrastructure
//! template tree (`bicep`) returned as a virtual [`OutputFileSet`].
//!
//! Generation is a pure function of `(manifest, overrides)`: no I/O, no
//! shared state, no caches. Two calls with equal inputs produce byte-equal
//! artifacts, and any error aborts the call without partial output.

pub mod bicep;
pub mod containerapp;
pub mod expr;
pub mod fileset;
pub mod graph;

pub use containerapp::{ContainerAppManifest, EnvVar, IngressRule};
pub use expr::{ExprError, Property, Ref, ResolvedExpression, ResolvedPart, Segment};
pub use fileset::OutputFileSet;
pub use graph::{DependencyGraph, GraphError};

use caravel_schema::{ExternalOverrides, Manifest};
use thiserror::Error;

/// Errors raised by the emitters.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("unknown resource '{0}'")]
    UnknownResource(String),
    #[error("override targets '{resource}/{binding}', which the manifest does not declare")]
    UnknownOverride { resource: String, binding: String },
    #[error(
        "binding '{binding}' on resource '{resource}' uses scheme '{scheme}', \
         which the platform cannot expose as public ingress"
    )]
    IncompatibleBinding {
        resource: String,
        binding: String,
        scheme: String,
    },
    #[error("names '{first}' and '{second}' collapse to the same template identifier")]
    IdentCollision { first: String, second: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error("failed to render descriptor: {0}")]
    Render(#[from] serde_yaml::Error),
}

/// Check every override entry against the manifest. A typo'd resource or
/// binding name would otherwise be a silent no-op.
pub(crate) fn validate_overrides(
    manifest: &Manifest,
    overrides: &ExternalOverrides,
) -> Result<(), EmitError> {
    for (resource, binding, _) in overrides.iter() {
        if manifest.binding(resource, binding).is_none() {
            return Err(EmitError::UnknownOverride {
                resource: resource.to_string(),
                binding: binding.to_string(),
            });
        }
    }
    Ok(())
}

/// Aggregate error for callers driving the whole pipeline.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] caravel_schema::ManifestError),
    #[error("expression error: {0}")]
    Expr(#[from] ExprError),
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("emit error: {0}")]
    Emit(#[from] EmitError),
}
