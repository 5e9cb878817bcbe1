//! Per-resource container deployment descriptor.
//!
//! The descriptor carries the public ingress rules derived from external
//! bindings and the resource's fully resolved environment. Values that are
//! only known after provisioning are rendered as `{{ outputs... }}`
//! placeholders in the descriptor's own syntax; the deploying tool
//! substitutes them from the infrastructure outputs.

use crate::expr::{self, ResolvedPart};
use crate::graph::DependencyGraph;
use crate::EmitError;
use caravel_schema::{ExternalOverrides, Manifest};
use serde::Serialize;
use tracing::debug;

const API_VERSION: &str = "caravel.dev/v1";

/// Ingress schemes the target platform can front publicly.
pub(crate) const INGRESS_SCHEMES: &[&str] = &["http", "https"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngressRule {
    pub name: String,
    pub scheme: String,
    pub port: u16,
    pub transport: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// Deployment descriptor for a single resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerAppManifest {
    pub api_version: String,
    pub resource: String,
    pub ingress: Vec<IngressRule>,
    pub environment: Vec<EnvVar>,
}

impl ContainerAppManifest {
    /// Render the descriptor as YAML. Byte-deterministic for equal inputs.
    pub fn to_yaml(&self) -> Result<String, EmitError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Emit the deployment descriptor for `name`.
///
/// The dependency graph is rebuilt from the manifest on every call; cycle and
/// reference errors surface before any value is resolved.
pub fn emit(
    manifest: &Manifest,
    name: &str,
    overrides: &ExternalOverrides,
) -> Result<ContainerAppManifest, EmitError> {
    let Some(resource) = manifest.get(name) else {
        return Err(EmitError::UnknownResource(name.to_owned()));
    };
    crate::validate_overrides(manifest, overrides)?;

    // Validates every reference and rejects cycles up front.
    let _graph = DependencyGraph::build(manifest)?;

    let mut ingress = Vec::new();
    for (binding_name, binding) in &resource.bindings {
        if !overrides.effective(name, binding_name, binding) {
            continue;
        }
        if !INGRESS_SCHEMES.contains(&binding.scheme.as_str()) {
            return Err(EmitError::IncompatibleBinding {
                resource: name.to_owned(),
                binding: binding_name.to_string(),
                scheme: binding.scheme.clone(),
            });
        }
        ingress.push(IngressRule {
            name: binding_name.to_string(),
            scheme: binding.scheme.clone(),
            port: binding.target_port,
            transport: binding.transport.clone(),
        });
    }

    let mut environment = Vec::with_capacity(resource.config_values.len());
    for (key, raw) in &resource.config_values {
        let resolved = expr::resolve(manifest, name, raw)?;
        let mut value = String::new();
        for part in &resolved.parts {
            match part {
                ResolvedPart::Literal(text) => value.push_str(text),
                ResolvedPart::DeployTime(reference) => {
                    value.push_str("{{ outputs.");
                    value.push_str(reference.resource.as_str());
                    if let Some(binding) = &reference.binding {
                        value.push('.');
                        value.push_str(binding.as_str());
                    }
                    value.push('.');
                    value.push_str(reference.property.as_wire());
                    value.push_str(" }}");
                }
            }
        }
        environment.push(EnvVar {
            name: key.clone(),
            value,
        });
    }

    debug!(
        resource = name,
        ingress = ingress.len(),
        env = environment.len(),
        "container descriptor emitted"
    );

    Ok(ContainerAppManifest {
        api_version: API_VERSION.to_owned(),
        resource: name.to_owned(),
        ingress,
        environment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use caravel_schema::parse_manifest_str;

    fn manifest() -> Manifest {
        parse_manifest_str(
            r#"
{
  "resources": {
    "nodeapp": {
      "kind": "project.v0",
      "bindings": {
        "http": { "scheme": "http", "transport": "http", "targetPort": 3000 }
      },
      "configValues": {
        "REDIS_URL": "{redis.connectionString}",
        "APP_MODE": "production",
        "OWN_KEY": "key={apikey.value}"
      }
    },
    "redis": { "kind": "service.v0" },
    "apikey": { "kind": "parameter.v0", "value": "s3cret" }
  }
}
"#,
        )
        .unwrap()
    }

    #[test]
    fn no_external_binding_means_no_ingress() {
        let m = manifest();
        let descriptor = emit(&m, "nodeapp", &ExternalOverrides::new()).unwrap();
        assert!(descriptor.ingress.is_empty());
    }

    #[test]
    fn override_produces_exactly_one_ingress_rule() {
        let m = manifest();
        let mut overrides = ExternalOverrides::new();
        overrides.set("nodeapp", "http", true);

        let descriptor = emit(&m, "nodeapp", &overrides).unwrap();
        assert_eq!(descriptor.ingress.len(), 1);
        let rule = &descriptor.ingress[0];
        assert_eq!(rule.name, "http");
        assert_eq!(rule.scheme, "http");
        assert_eq!(rule.port, 3000);
        assert_eq!(rule.transport, "http");
    }

    #[test]
    fn environment_preserves_declaration_order() {
        let m = manifest();
        let descriptor = emit(&m, "nodeapp", &ExternalOverrides::new()).unwrap();
        let keys: Vec<&str> = descriptor
            .environment
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(keys, vec!["REDIS_URL", "APP_MODE", "OWN_KEY"]);
    }

    #[test]
    fn static_values_render_as_literals() {
        let m = manifest();
        let descriptor = emit(&m, "nodeapp", &ExternalOverrides::new()).unwrap();
        assert_eq!(descriptor.environment[1].value, "production");
        assert_eq!(descriptor.environment[2].value, "key=s3cret");
    }

    #[test]
    fn deploy_time_values_render_as_placeholders() {
        let m = manifest();
        let descriptor = emit(&m, "nodeapp", &ExternalOverrides::new()).unwrap();
        assert_eq!(
            descriptor.environment[0].value,
            "{{ outputs.redis.connectionString }}"
        );
    }

    #[test]
    fn binding_reference_placeholder_includes_binding_name() {
        let m = parse_manifest_str(
            r#"
{
  "resources": {
    "api": {
      "kind": "project.v0",
      "bindings": {
        "http": { "scheme": "http", "transport": "http", "targetPort": 8080 }
      }
    },
    "worker": {
      "kind": "project.v0",
      "configValues": { "API": "{api.bindings.http.url}" }
    }
  }
}
"#,
        )
        .unwrap();
        let descriptor = emit(&m, "worker", &ExternalOverrides::new()).unwrap();
        assert_eq!(
            descriptor.environment[0].value,
            "{{ outputs.api.http.url }}"
        );
    }

    #[test]
    fn tcp_external_binding_is_incompatible() {
        let m = parse_manifest_str(
            r#"
{
  "resources": {
    "db": {
      "kind": "container.v0",
      "image": "postgres:16",
      "bindings": {
        "tcp": { "scheme": "tcp", "transport": "tcp", "targetPort": 5432 }
      }
    }
  }
}
"#,
        )
        .unwrap();
        let mut overrides = ExternalOverrides::new();
        overrides.set("db", "tcp", true);

        let err = emit(&m, "db", &overrides).unwrap_err();
        assert!(matches!(
            err,
            EmitError::IncompatibleBinding { scheme, .. } if scheme == "tcp"
        ));
    }

    #[test]
    fn override_for_undeclared_binding_is_rejected() {
        let m = manifest();
        let mut overrides = ExternalOverrides::new();
        overrides.set("nodeapp", "htpp", true);

        let err = emit(&m, "nodeapp", &overrides).unwrap_err();
        match err {
            EmitError::UnknownOverride { resource, binding } => {
                assert_eq!(resource, "nodeapp");
                assert_eq!(binding, "htpp");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn override_for_undeclared_resource_is_rejected() {
        let m = manifest();
        let mut overrides = ExternalOverrides::new();
        overrides.set("ghost", "http", true);

        let err = emit(&m, "nodeapp", &overrides).unwrap_err();
        assert!(matches!(
            err,
            EmitError::UnknownOverride { resource, .. } if resource == "ghost"
        ));
    }

    #[test]
    fn unknown_resource_is_rejected() {
        let m = manifest();
        let err = emit(&m, "ghost", &ExternalOverrides::new()).unwrap_err();
        assert!(matches!(err, EmitError::UnknownResource(name) if name == "ghost"));
    }

    #[test]
    fn yaml_rendering_is_deterministic() {
        let m = manifest();
        let mut overrides = ExternalOverrides::new();
        overrides.set("nodeapp", "http", true);

        let a = emit(&m, "nodeapp", &overrides).unwrap().to_yaml().unwrap();
        let b = emit(&m, "nodeapp", &overrides).unwrap().to_yaml().unwrap();
        assert_eq!(a, b);
        assert!(a.contains("apiVersion: caravel.dev/v1"));
        assert!(a.contains("port: 3000"));
    }
}
