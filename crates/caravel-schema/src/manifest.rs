use crate::types::{BindingName, ResourceName};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to parse manifest: {0}")]
    Json(#[from] serde_json::Error),
    #[error("manifest is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("resource '{resource}' has unsupported kind '{kind}'")]
    UnsupportedResourceType { resource: String, kind: String },
    #[error("resource '{resource}' is missing required field '{field}'")]
    MissingField { resource: String, field: String },
    #[error("binding '{binding}' on resource '{resource}' is invalid: {reason}")]
    InvalidBinding {
        resource: String,
        binding: String,
        reason: String,
    },
}

/// Kind of a resource, driving which generation strategy applies.
///
/// Closed set: an unrecognized wire value fails parsing with
/// [`ManifestError::UnsupportedResourceType`]. Extending the system means
/// adding a variant here plus a generator table entry, never an open-ended
/// string check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// A built-from-source application project.
    Project,
    /// A prebuilt container image.
    Container,
    /// A managed backing service (cache, database, queue).
    ManagedService,
    /// A static value known at generation time; provisions nothing.
    Parameter,
}

impl ResourceKind {
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "project.v0" => Some(Self::Project),
            "container.v0" => Some(Self::Container),
            "service.v0" => Some(Self::ManagedService),
            "parameter.v0" => Some(Self::Parameter),
            _ => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Project => "project.v0",
            Self::Container => "container.v0",
            Self::ManagedService => "service.v0",
            Self::Parameter => "parameter.v0",
        }
    }

    /// Whether this kind produces an infrastructure template of its own.
    pub fn requires_provisioning(self) -> bool {
        !matches!(self, Self::Parameter)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// A named network endpoint exposed by a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Binding {
    pub scheme: String,
    pub transport: String,
    pub target_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_port: Option<u16>,
    /// Declared public-ingress flag. Callers usually leave this false in the
    /// source document and flip it through an override snapshot instead.
    #[serde(default)]
    pub external: bool,
}

/// A named unit of the application topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub kind: ResourceKind,
    /// Container image, required for [`ResourceKind::Container`].
    pub image: Option<String>,
    /// Static value, required for [`ResourceKind::Parameter`].
    pub value: Option<String>,
    pub bindings: IndexMap<BindingName, Binding>,
    /// Configuration values in declaration order; values may embed
    /// cross-resource reference expressions.
    pub config_values: IndexMap<String, String>,
}

/// Declarative description of an application's resources and topology.
///
/// Constructed once by [`parse_manifest_bytes`] and immutable afterwards.
/// Resource declaration order is preserved and used as a deterministic
/// tie-break downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    resources: IndexMap<ResourceName, Resource>,
}

impl Manifest {
    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }

    /// Resource names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &ResourceName> {
        self.resources.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceName, &Resource)> {
        self.resources.iter()
    }

    /// Zero-based position of a resource in the source document.
    pub fn declaration_index(&self, name: &str) -> Option<usize> {
        self.resources.get_index_of(name)
    }

    pub fn binding(&self, resource: &str, binding: &str) -> Option<&Binding> {
        self.get(resource).and_then(|r| r.bindings.get(binding))
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

// Raw serde shape: `kind` stays a plain string here so that an unknown kind
// can be reported per-resource instead of as an opaque serde error.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDocument {
    resources: IndexMap<String, RawResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawResource {
    kind: String,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    bindings: IndexMap<String, Binding>,
    #[serde(default)]
    config_values: IndexMap<String, String>,
}

/// Parse a raw manifest document into a fully-typed [`Manifest`].
///
/// Fails atomically: either every resource validates or nothing is returned.
pub fn parse_manifest_bytes(bytes: &[u8]) -> Result<Manifest, ManifestError> {
    parse_manifest_str(std::str::from_utf8(bytes)?)
}

pub fn parse_manifest_str(input: &str) -> Result<Manifest, ManifestError> {
    let raw: RawDocument = serde_json::from_str(input)?;

    let mut resources = IndexMap::with_capacity(raw.resources.len());
    for (name, res) in raw.resources {
        let kind = ResourceKind::from_wire(&res.kind).ok_or_else(|| {
            ManifestError::UnsupportedResourceType {
                resource: name.clone(),
                kind: res.kind.clone(),
            }
        })?;

        match kind {
            ResourceKind::Container if res.image.is_none() => {
                return Err(ManifestError::MissingField {
                    resource: name,
                    field: "image".to_owned(),
                });
            }
            ResourceKind::Parameter if res.value.is_none() => {
                return Err(ManifestError::MissingField {
                    resource: name,
                    field: "value".to_owned(),
                });
            }
            _ => {}
        }

        let mut bindings = IndexMap::with_capacity(res.bindings.len());
        for (binding_name, binding) in res.bindings {
            validate_binding(&name, &binding_name, &binding)?;
            bindings.insert(BindingName::new(binding_name), binding);
        }

        resources.insert(
            ResourceName::new(name),
            Resource {
                kind,
                image: res.image,
                value: res.value,
                bindings,
                config_values: res.config_values,
            },
        );
    }

    Ok(Manifest { resources })
}

fn validate_binding(
    resource: &str,
    binding: &str,
    decl: &Binding,
) -> Result<(), ManifestError> {
    if decl.scheme.trim().is_empty() {
        return Err(ManifestError::InvalidBinding {
            resource: resource.to_owned(),
            binding: binding.to_owned(),
            reason: "scheme must not be empty".to_owned(),
        });
    }
    if decl.transport.trim().is_empty() {
        return Err(ManifestError::InvalidBinding {
            resource: resource.to_owned(),
            binding: binding.to_owned(),
            reason: "transport must not be empty".to_owned(),
        });
    }
    if decl.target_port == 0 {
        return Err(ManifestError::InvalidBinding {
            resource: resource.to_owned(),
            binding: binding.to_owned(),
            reason: "targetPort must be non-zero".to_owned(),
        });
    }
    if decl.container_port == Some(0) {
        return Err(ManifestError::InvalidBinding {
            resource: resource.to_owned(),
            binding: binding.to_owned(),
            reason: "containerPort must be non-zero".to_owned(),
        });
    }
    Ok(())
}
