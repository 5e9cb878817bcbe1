use crate::manifest::Binding;
use crate::types::{BindingName, ResourceName};
use std::collections::BTreeMap;

/// Immutable snapshot of caller-supplied external-flag overrides.
///
/// The source document rarely marks bindings for public ingress; the tool
/// consuming the manifest decides which services to expose and records that
/// decision here rather than mutating the parsed [`Manifest`]. A snapshot is
/// fixed before a generation call begins and must not change during it, which
/// keeps generation a pure function of `(manifest, overrides)`.
///
/// [`Manifest`]: crate::manifest::Manifest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalOverrides {
    entries: BTreeMap<(ResourceName, BindingName), bool>,
}

impl ExternalOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the external flag for one binding. Later calls win.
    pub fn set(
        &mut self,
        resource: impl Into<ResourceName>,
        binding: impl Into<BindingName>,
        external: bool,
    ) {
        self.entries
            .insert((resource.into(), binding.into()), external);
    }

    pub fn get(&self, resource: &str, binding: &str) -> Option<bool> {
        self.entries
            .get(&(ResourceName::new(resource), BindingName::new(binding)))
            .copied()
    }

    /// Effective external flag for a binding: the override if present,
    /// otherwise the declared flag.
    pub fn effective(&self, resource: &str, binding: &str, decl: &Binding) -> bool {
        self.get(resource, binding).unwrap_or(decl.external)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceName, &BindingName, bool)> {
        self.entries.iter().map(|((r, b), e)| (r, b, *e))
    }
}
