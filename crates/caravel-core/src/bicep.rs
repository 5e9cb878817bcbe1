//! Infrastructure template generation.
//!
//! Emits one bicep template per provisionable resource plus an orchestrating
//! `main.bicep` that instantiates the templates as modules in dependency
//! order and wires earlier modules' outputs into later modules' parameters.
//! Deploy-time references are always rendered as bicep expressions inside the
//! target template, never flattened into provisional literal strings, so
//! evaluation happens where the real values exist: at deployment time.

use crate::containerapp::INGRESS_SCHEMES;
use crate::expr::{self, Property, Ref, ResolvedExpression, ResolvedPart};
use crate::fileset::OutputFileSet;
use crate::graph::DependencyGraph;
use crate::EmitError;
use caravel_schema::{
    Binding, BindingName, ExternalOverrides, Manifest, Resource, ResourceKind, ResourceName,
};
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use tracing::{debug, info};

/// An output one template must declare because another resource references it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct OutputKey {
    binding: Option<BindingName>,
    property: Property,
}

impl OutputKey {
    fn from_ref(reference: &Ref) -> Self {
        Self {
            binding: reference.binding.clone(),
            property: reference.property,
        }
    }

    /// Identifier of the output inside the target template.
    fn output_ident(&self) -> String {
        match &self.binding {
            Some(binding) => format!("{}_{}", ident(binding), property_ident(self.property)),
            None => property_ident(self.property).to_owned(),
        }
    }
}

/// Identifier of the parameter a referencing template declares for `reference`.
fn param_ident(reference: &Ref) -> String {
    let key = OutputKey::from_ref(reference);
    format!("{}_{}", ident(&reference.resource), key.output_ident())
}

fn property_ident(property: Property) -> &'static str {
    match property {
        Property::Url => "url",
        Property::Host => "host",
        Property::Port => "port",
        Property::Scheme => "scheme",
        Property::ConnectionString => "connection_string",
        Property::Value => "value",
    }
}

/// Make a manifest name safe as a bicep identifier.
fn ident(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Sanitization is lossy (`a-b` and `a_b` both become `a_b`), so names that
/// collapse to the same identifier would silently mis-wire module params and
/// outputs. Reject them instead.
fn check_ident_collisions(manifest: &Manifest) -> Result<(), EmitError> {
    let mut resources: BTreeMap<String, &ResourceName> = BTreeMap::new();
    for (name, resource) in manifest.iter() {
        if !resource.kind.requires_provisioning() {
            continue;
        }
        if let Some(prev) = resources.insert(ident(name), name) {
            return Err(EmitError::IdentCollision {
                first: prev.to_string(),
                second: name.to_string(),
            });
        }
        let mut bindings: BTreeMap<String, &BindingName> = BTreeMap::new();
        for binding in resource.bindings.keys() {
            if let Some(prev) = bindings.insert(ident(binding), binding) {
                return Err(EmitError::IdentCollision {
                    first: format!("{name}.{prev}"),
                    second: format!("{name}.{binding}"),
                });
            }
        }
    }
    Ok(())
}

/// Escape a literal for a bicep single-quoted string. Only `${` needs the
/// dollar escaped; a lone `$` is plain text.
fn escape_bicep(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
            _ => out.push(c),
        }
    }
    out
}

/// Render a resolved expression as a bicep string expression.
fn bicep_value(resolved: &ResolvedExpression) -> String {
    match resolved.parts.as_slice() {
        [] => "''".to_owned(),
        [ResolvedPart::DeployTime(reference)] => param_ident(reference),
        parts => {
            let mut out = String::from("'");
            for part in parts {
                match part {
                    ResolvedPart::Literal(text) => out.push_str(&escape_bicep(text)),
                    ResolvedPart::DeployTime(reference) => {
                        let _ = write!(out, "${{{}}}", param_ident(reference));
                    }
                }
            }
            out.push('\'');
            out
        }
    }
}

/// Everything a generation strategy needs to produce one template file.
struct GeneratorContext<'a> {
    name: &'a str,
    resource: &'a Resource,
    /// Config values resolved and rendered as bicep expressions, in
    /// declaration order.
    env: Vec<(String, String)>,
    /// Parameters for deploy-time references, sorted by identifier.
    ref_params: Vec<String>,
    /// Outputs this template must declare, sorted.
    outputs: Vec<OutputKey>,
    /// Bindings with their effective external flag, in declaration order.
    bindings: Vec<(&'a BindingName, &'a Binding, bool)>,
}

impl GeneratorContext<'_> {
    fn binding(&self, name: &BindingName) -> Option<&Binding> {
        self.bindings
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|(_, b, _)| *b)
    }
}

/// A generation strategy for one resource kind.
trait TemplateGenerator: Sync {
    fn generate(&self, cx: &GeneratorContext<'_>) -> String;
}

/// Closed registration table mapping resource kinds to their strategies.
/// Kinds without infrastructure (parameters) map to `None`.
fn generator_for(kind: ResourceKind) -> Option<&'static dyn TemplateGenerator> {
    match kind {
        ResourceKind::Project => Some(&ProjectGenerator),
        ResourceKind::Container => Some(&ContainerGenerator),
        ResourceKind::ManagedService => Some(&ManagedServiceGenerator),
        ResourceKind::Parameter => None,
    }
}

struct ProjectGenerator;
struct ContainerGenerator;
struct ManagedServiceGenerator;

impl TemplateGenerator for ProjectGenerator {
    fn generate(&self, cx: &GeneratorContext<'_>) -> String {
        let image = format!("{}_image", ident(cx.name));
        container_app_template(cx, &image, Some(&image))
    }
}

impl TemplateGenerator for ContainerGenerator {
    fn generate(&self, cx: &GeneratorContext<'_>) -> String {
        let image = cx
            .resource
            .image
            .as_deref()
            .map(escape_bicep)
            .map(|i| format!("'{i}'"))
            .unwrap_or_else(|| "''".to_owned());
        container_app_template(cx, &image, None)
    }
}

/// Shared body for the container-app kinds. `image_expr` is a bicep
/// expression; `image_param` adds a `param` declaration when the image is
/// supplied at deploy time (projects, which are built out-of-band).
fn container_app_template(
    cx: &GeneratorContext<'_>,
    image_expr: &str,
    image_param: Option<&str>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "param location string");
    if let Some(param) = image_param {
        let _ = writeln!(out, "param {param} string");
    }
    for param in &cx.ref_params {
        let _ = writeln!(out, "param {param} string");
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "resource app 'Microsoft.App/containerApps@2024-03-01' = {{"
    );
    let _ = writeln!(out, "  name: '{}'", escape_bicep(cx.name));
    let _ = writeln!(out, "  location: location");
    let _ = writeln!(out, "  properties: {{");

    // The first binding shapes the ingress surface; a binding that is never
    // marked external still provisions internal ingress so in-cluster traffic
    // can reach it.
    if let Some((_, binding, external)) = cx.bindings.first() {
        let _ = writeln!(out, "    configuration: {{");
        let _ = writeln!(out, "      ingress: {{");
        let _ = writeln!(out, "        external: {external}");
        let _ = writeln!(out, "        targetPort: {}", binding.target_port);
        let _ = writeln!(out, "        transport: '{}'", escape_bicep(&binding.transport));
        let _ = writeln!(out, "      }}");
        let _ = writeln!(out, "    }}");
    }

    let _ = writeln!(out, "    template: {{");
    let _ = writeln!(out, "      containers: [");
    let _ = writeln!(out, "        {{");
    let _ = writeln!(out, "          name: '{}'", escape_bicep(cx.name));
    let _ = writeln!(out, "          image: {image_expr}");
    if !cx.env.is_empty() {
        let _ = writeln!(out, "          env: [");
        for (key, value) in &cx.env {
            let _ = writeln!(out, "            {{");
            let _ = writeln!(out, "              name: '{}'", escape_bicep(key));
            let _ = writeln!(out, "              value: {value}");
            let _ = writeln!(out, "            }}");
        }
        let _ = writeln!(out, "          ]");
    }
    let _ = writeln!(out, "        }}");
    let _ = writeln!(out, "      ]");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "  }}");
    let _ = writeln!(out, "}}");

    let fqdn = "app.properties.configuration.ingress.fqdn";
    for output in &cx.outputs {
        let expr = match (&output.binding, output.property) {
            (Some(b), Property::Url) => {
                let scheme = cx.binding(b).map_or("http", |d| d.scheme.as_str());
                format!("'{}://${{{fqdn}}}'", escape_bicep(scheme))
            }
            (Some(_), Property::Host) => fqdn.to_owned(),
            (Some(b), Property::Port) => {
                let port = cx.binding(b).map_or(0, |d| d.target_port);
                format!("'{port}'")
            }
            (Some(b), Property::Scheme) => {
                let scheme = cx.binding(b).map_or("http", |d| d.scheme.as_str());
                format!("'{}'", escape_bicep(scheme))
            }
            (None, Property::ConnectionString) => format!("'${{{fqdn}}}'"),
            // Remaining combinations are rejected during resolution.
            _ => "''".to_owned(),
        };
        let _ = writeln!(out);
        let _ = writeln!(out, "output {} string = {expr}", output.output_ident());
    }
    out
}

impl TemplateGenerator for ManagedServiceGenerator {
    fn generate(&self, cx: &GeneratorContext<'_>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "param location string");
        for param in &cx.ref_params {
            let _ = writeln!(out, "param {param} string");
        }

        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "resource svc 'Caravel.Managed/services@2024-02-01' = {{"
        );
        let _ = writeln!(out, "  name: '{}'", escape_bicep(cx.name));
        let _ = writeln!(out, "  location: location");
        let _ = writeln!(out, "  properties: {{");
        let _ = writeln!(out, "    service: '{}'", escape_bicep(cx.name));
        if !cx.bindings.is_empty() {
            let _ = writeln!(out, "    endpoints: [");
            for (name, binding, _) in &cx.bindings {
                let _ = writeln!(out, "      {{");
                let _ = writeln!(out, "        name: '{}'", escape_bicep(name));
                let _ = writeln!(out, "        scheme: '{}'", escape_bicep(&binding.scheme));
                let _ = writeln!(out, "        port: {}", binding.target_port);
                let _ = writeln!(out, "      }}");
            }
            let _ = writeln!(out, "    ]");
        }
        let _ = writeln!(out, "  }}");
        let _ = writeln!(out, "}}");

        for output in &cx.outputs {
            let expr = match (&output.binding, output.property) {
                (None, Property::ConnectionString) => {
                    "svc.properties.connectionString".to_owned()
                }
                (Some(_), Property::Host) => "svc.properties.host".to_owned(),
                (Some(b), Property::Port) => {
                    let port = cx.binding(b).map_or(0, |d| d.target_port);
                    format!("'{port}'")
                }
                (Some(b), Property::Scheme) => {
                    let scheme = cx.binding(b).map_or("tcp", |d| d.scheme.as_str());
                    format!("'{}'", escape_bicep(scheme))
                }
                (Some(b), Property::Url) => {
                    let decl = cx.binding(b);
                    let scheme = decl.map_or("tcp", |d| d.scheme.as_str());
                    let port = decl.map_or(0, |d| d.target_port);
                    format!(
                        "'{}://${{svc.properties.host}}:{port}'",
                        escape_bicep(scheme)
                    )
                }
                _ => "''".to_owned(),
            };
            let _ = writeln!(out);
            let _ = writeln!(out, "output {} string = {expr}", output.output_ident());
        }
        out
    }
}

/// Emit the full infrastructure template tree for a manifest.
///
/// Fails atomically on any graph or resolution error: no partial file set is
/// ever returned. Output is byte-identical for equal `(manifest, overrides)`.
pub fn emit(
    manifest: &Manifest,
    overrides: &ExternalOverrides,
) -> Result<OutputFileSet, EmitError> {
    crate::validate_overrides(manifest, overrides)?;
    check_ident_collisions(manifest)?;

    let graph = DependencyGraph::build(manifest)?;
    let order = graph.topo_order();

    // Resolve everything up front; a failure here aborts before any file is
    // produced.
    let mut resolved: IndexMap<&ResourceName, Vec<(&String, ResolvedExpression)>> =
        IndexMap::new();
    for (name, resource) in manifest.iter() {
        let mut values = Vec::with_capacity(resource.config_values.len());
        for (key, raw) in &resource.config_values {
            values.push((key, expr::resolve(manifest, name.as_str(), raw)?));
        }
        resolved.insert(name, values);
    }

    // Which outputs each provisioned resource must declare.
    let mut required_outputs: BTreeMap<ResourceName, BTreeSet<OutputKey>> = BTreeMap::new();
    for values in resolved.values() {
        for (_, resolution) in values {
            for reference in resolution.deploy_time_refs() {
                required_outputs
                    .entry(reference.resource.clone())
                    .or_default()
                    .insert(OutputKey::from_ref(reference));
            }
        }
    }

    let mut files = OutputFileSet::new();
    let mut modules: Vec<ModulePlan<'_>> = Vec::new();

    for name in &order {
        let resource = manifest
            .get(name)
            .ok_or_else(|| EmitError::UnknownResource(name.to_string()))?;
        let Some(generator) = generator_for(resource.kind) else {
            continue;
        };

        let values = &resolved[name];
        let env: Vec<(String, String)> = values
            .iter()
            .map(|(key, resolution)| ((*key).clone(), bicep_value(resolution)))
            .collect();

        let mut refs: BTreeMap<String, Ref> = BTreeMap::new();
        for (_, resolution) in values {
            for reference in resolution.deploy_time_refs() {
                refs.insert(param_ident(reference), reference.clone());
            }
        }

        let bindings: Vec<(&BindingName, &Binding, bool)> = resource
            .bindings
            .iter()
            .map(|(binding_name, binding)| {
                (
                    binding_name,
                    binding,
                    overrides.effective(name, binding_name, binding),
                )
            })
            .collect();

        // Same rule as the descriptor emitter: a binding that is effectively
        // external must use a scheme the platform can front publicly.
        for (binding_name, binding, external) in &bindings {
            if *external && !INGRESS_SCHEMES.contains(&binding.scheme.as_str()) {
                return Err(EmitError::IncompatibleBinding {
                    resource: name.to_string(),
                    binding: binding_name.to_string(),
                    scheme: binding.scheme.clone(),
                });
            }
        }

        let outputs: Vec<OutputKey> = required_outputs
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let cx = GeneratorContext {
            name: name.as_str(),
            resource,
            env,
            ref_params: refs.keys().cloned().collect(),
            outputs,
            bindings,
        };
        let body = generator.generate(&cx);
        let path = format!("resources/{name}.bicep");
        debug!(resource = %name, path = %path, "infra template generated");
        files.insert(path, body.into_bytes());

        modules.push(ModulePlan {
            name,
            kind: resource.kind,
            refs,
        });
    }

    files.insert("main.bicep", render_main(&modules).into_bytes());
    info!(
        files = files.len(),
        resources = modules.len(),
        "infrastructure template tree emitted"
    );
    Ok(files)
}

struct ModulePlan<'a> {
    name: &'a ResourceName,
    kind: ResourceKind,
    /// param ident -> reference, sorted by ident.
    refs: BTreeMap<String, Ref>,
}

fn render_main(modules: &[ModulePlan<'_>]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "targetScope = 'resourceGroup'");
    let _ = writeln!(out);
    let _ = writeln!(out, "param location string = resourceGroup().location");
    for module in modules {
        if module.kind == ResourceKind::Project {
            let _ = writeln!(out, "param {}_image string", ident(module.name));
        }
    }

    for module in modules {
        let symbol = ident(module.name);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "module {symbol} 'resources/{}.bicep' = {{",
            module.name
        );
        let _ = writeln!(out, "  name: '{}'", escape_bicep(module.name.as_str()));
        let _ = writeln!(out, "  params: {{");
        let _ = writeln!(out, "    location: location");
        if module.kind == ResourceKind::Project {
            let _ = writeln!(out, "    {symbol}_image: {symbol}_image");
        }
        for (param, reference) in &module.refs {
            let _ = writeln!(
                out,
                "    {param}: {}.outputs.{}",
                ident(&reference.resource),
                OutputKey::from_ref(reference).output_ident()
            );
        }
        let _ = writeln!(out, "  }}");
        let _ = writeln!(out, "}}");
    }
    out
}
