//! Resource dependency graph derived from reference expressions.
//!
//! Edges point from the referenced resource to the referencer, so a
//! topological order yields dependencies first. Built with `petgraph`; cycle
//! detection runs at build time, before any expression is resolved, which
//! bounds resolver recursion by resource count.

use crate::expr::{self, ExprError, Segment};
use caravel_schema::{Manifest, ResourceName};
use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error("cyclic dependency: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<ResourceName> },
}

fn format_cycle(cycle: &[ResourceName]) -> String {
    let mut out = cycle
        .iter()
        .map(ResourceName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ");
    if let Some(first) = cycle.first() {
        out.push_str(" -> ");
        out.push_str(first.as_str());
    }
    out
}

/// Directed dependency graph over a manifest's resources.
#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<ResourceName, ()>,
    nodes: IndexMap<ResourceName, NodeIndex>,
}

impl DependencyGraph {
    /// Build the graph from every reference expression in the manifest.
    ///
    /// References are validated against the manifest (unknown resource,
    /// binding, or property fails here) and every cross-resource reference
    /// adds one edge. A self-reference is an edge like any other, so it is
    /// rejected as a one-member cycle. Fails before any resolution happens.
    pub fn build(manifest: &Manifest) -> Result<Self, GraphError> {
        let mut graph = DiGraph::new();
        let mut nodes = IndexMap::with_capacity(manifest.len());
        for name in manifest.names() {
            nodes.insert(name.clone(), graph.add_node(name.clone()));
        }

        let mut seen_edges = HashSet::new();
        for (name, resource) in manifest.iter() {
            let exprs = resource
                .config_values
                .values()
                .chain(resource.value.as_ref());
            for raw in exprs {
                for segment in expr::tokenize(name.as_str(), raw)? {
                    let Segment::Reference(reference) = segment else {
                        continue;
                    };
                    expr::validate_ref(manifest, name.as_str(), raw, &reference)?;
                    let from = nodes[&reference.resource];
                    let to = nodes[name];
                    if seen_edges.insert((from, to)) {
                        graph.add_edge(from, to, ());
                    }
                }
            }
        }

        let built = Self { graph, nodes };
        built.reject_cycles()?;
        debug!(
            resources = built.nodes.len(),
            edges = built.graph.edge_count(),
            "dependency graph built"
        );
        Ok(built)
    }

    fn reject_cycles(&self) -> Result<(), GraphError> {
        let mut cyclic: Vec<Vec<NodeIndex>> = petgraph::algo::tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0])
            })
            .collect();
        if cyclic.is_empty() {
            return Ok(());
        }

        // Report the cycle involving the first-declared resource.
        cyclic.sort_by_key(|scc| scc.iter().min().copied());
        let scc = &cyclic[0];
        Err(GraphError::CyclicDependency {
            cycle: self.order_cycle(scc),
        })
    }

    /// Walk the strongly-connected component from its first-declared member,
    /// following edges inside the component, to report an ordered cycle path.
    fn order_cycle(&self, scc: &[NodeIndex]) -> Vec<ResourceName> {
        let members: HashSet<NodeIndex> = scc.iter().copied().collect();
        let start = scc.iter().min().copied().unwrap_or_default();

        let mut path = vec![start];
        let mut visited = HashSet::from([start]);
        let mut current = start;
        loop {
            let mut next: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(current, Direction::Outgoing)
                .filter(|n| members.contains(n) && !visited.contains(n))
                .collect();
            next.sort_unstable();
            match next.first() {
                Some(&n) => {
                    path.push(n);
                    visited.insert(n);
                    current = n;
                }
                None => break,
            }
        }
        path.into_iter()
            .map(|n| self.graph[n].clone())
            .collect()
    }

    /// Stable topological order: every edge's source (the referenced
    /// resource) precedes its target (the referencer); ties are broken by
    /// declaration order.
    pub fn topo_order(&self) -> Vec<ResourceName> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| {
                self.graph
                    .neighbors_directed(n, Direction::Incoming)
                    .count()
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<NodeIndex>> = self
            .graph
            .node_indices()
            .filter(|n| in_degree[n.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(n)) = ready.pop() {
            order.push(self.graph[n].clone());
            for succ in self.graph.neighbors_directed(n, Direction::Outgoing) {
                in_degree[succ.index()] -= 1;
                if in_degree[succ.index()] == 0 {
                    ready.push(Reverse(succ));
                }
            }
        }
        // Cycles were rejected at build time, so every node is emitted.
        debug_assert_eq!(order.len(), self.graph.node_count());
        order
    }

    /// Resources that `name` references, in declaration order.
    pub fn references_of(&self, name: &str) -> Vec<&ResourceName> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Resources that reference `name`, in declaration order.
    pub fn referenced_by(&self, name: &str) -> Vec<&ResourceName> {
        self.neighbors(name, Direction::Outgoing)
    }

    fn neighbors(&self, name: &str, dir: Direction) -> Vec<&ResourceName> {
        let Some(&idx) = self.nodes.get(name) else {
            return Vec::new();
        };
        let mut out: Vec<NodeIndex> = self.graph.neighbors_directed(idx, dir).collect();
        out.sort_unstable();
        out.iter().map(|&n| &self.graph[n]).collect()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caravel_schema::parse_manifest_str;

    fn graph_for(json: &str) -> Result<DependencyGraph, GraphError> {
        DependencyGraph::build(&parse_manifest_str(json).unwrap())
    }

    #[test]
    fn edges_follow_references() {
        let graph = graph_for(
            r#"
{
  "resources": {
    "web": {
      "kind": "project.v0",
      "configValues": { "CACHE": "{redis.connectionString}" }
    },
    "redis": { "kind": "service.v0" }
  }
}
"#,
        )
        .unwrap();
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.references_of("web"), vec![&ResourceName::new("redis")]);
        assert_eq!(graph.referenced_by("redis"), vec![&ResourceName::new("web")]);
    }

    #[test]
    fn topo_order_puts_dependencies_first() {
        let graph = graph_for(
            r#"
{
  "resources": {
    "web": {
      "kind": "project.v0",
      "configValues": {
        "CACHE": "{redis.connectionString}",
        "API": "{api.bindings.http.url}"
      }
    },
    "api": {
      "kind": "project.v0",
      "bindings": {
        "http": { "scheme": "http", "transport": "http", "targetPort": 8080 }
      },
      "configValues": { "CACHE": "{redis.connectionString}" }
    },
    "redis": { "kind": "service.v0" }
  }
}
"#,
        )
        .unwrap();
        let order = graph.topo_order();
        assert_eq!(order, vec!["redis", "api", "web"]);
    }

    #[test]
    fn unconstrained_resources_keep_declaration_order() {
        let graph = graph_for(
            r#"
{
  "resources": {
    "zeta": { "kind": "service.v0" },
    "alpha": { "kind": "service.v0" },
    "mid": { "kind": "service.v0" }
  }
}
"#,
        )
        .unwrap();
        assert_eq!(graph.topo_order(), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn every_edge_source_precedes_its_target() {
        let graph = graph_for(
            r#"
{
  "resources": {
    "d": { "kind": "project.v0", "configValues": { "B": "{b.connectionString}", "C": "{c.connectionString}" } },
    "c": { "kind": "service.v0" },
    "b": { "kind": "project.v0", "configValues": { "A": "{a.connectionString}" } },
    "a": { "kind": "service.v0" }
  }
}
"#,
        )
        .unwrap();
        let order = graph.topo_order();
        let pos = |n: &str| order.iter().position(|o| o == n).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn mutual_references_are_a_cycle_naming_both() {
        let err = graph_for(
            r#"
{
  "resources": {
    "a": {
      "kind": "project.v0",
      "bindings": { "http": { "scheme": "http", "transport": "http", "targetPort": 80 } },
      "configValues": { "PEER": "{b.bindings.http.url}" }
    },
    "b": {
      "kind": "project.v0",
      "bindings": { "http": { "scheme": "http", "transport": "http", "targetPort": 80 } },
      "configValues": { "PEER": "{a.bindings.http.url}" }
    }
  }
}
"#,
        )
        .unwrap_err();
        match err {
            GraphError::CyclicDependency { cycle } => {
                assert_eq!(cycle.len(), 2);
                assert!(cycle.contains(&ResourceName::new("a")));
                assert!(cycle.contains(&ResourceName::new("b")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let err = graph_for(
            r#"
{
  "resources": {
    "a": {
      "kind": "project.v0",
      "bindings": { "http": { "scheme": "http", "transport": "http", "targetPort": 80 } },
      "configValues": { "SELF": "{a.bindings.http.url}" }
    }
  }
}
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GraphError::CyclicDependency { cycle } if cycle == vec![ResourceName::new("a")]
        ));
    }

    #[test]
    fn unknown_reference_fails_at_build() {
        let err = graph_for(
            r#"
{
  "resources": {
    "web": {
      "kind": "project.v0",
      "configValues": { "X": "{missing.bindings.http.url}" }
    }
  }
}
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GraphError::Expr(ExprError::UnknownResource { reference, .. }) if reference == "missing"
        ));
    }

    #[test]
    fn parameter_values_contribute_edges() {
        let graph = graph_for(
            r#"
{
  "resources": {
    "combined": { "kind": "parameter.v0", "value": "{part.value}-suffix" },
    "part": { "kind": "parameter.v0", "value": "x" }
  }
}
"#,
        )
        .unwrap();
        assert_eq!(graph.topo_order(), vec!["part", "combined"]);
    }

    #[test]
    fn duplicate_references_add_one_edge() {
        let graph = graph_for(
            r#"
{
  "resources": {
    "web": {
      "kind": "project.v0",
      "configValues": {
        "A": "{redis.connectionString}",
        "B": "{redis.connectionString}"
      }
    },
    "redis": { "kind": "service.v0" }
  }
}
"#,
        )
        .unwrap();
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn cycle_display_names_the_full_path() {
        let err = graph_for(
            r#"
{
  "resources": {
    "a": { "kind": "parameter.v0", "value": "{b.value}" },
    "b": { "kind": "parameter.v0", "value": "{a.value}" }
  }
}
"#,
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("a -> b -> a"), "message: {message}");
    }
}
