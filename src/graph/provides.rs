// src/graph/provides.rs

//! Detection of packages providing the same capability

use super::node::TransitiveKey;
use super::{DepsGraph, GraphError, NodeId};
use std::collections::HashMap;

/// Check that no node sees two packages providing the same capability
///
/// A capability collides with the node's own provides, with a package of
/// that name among its dependencies, or with another dependency providing it.
pub(crate) fn check_graph_provides(graph: &DepsGraph) -> Result<(), GraphError> {
    for node in graph.nodes() {
        let mut providers: HashMap<TransitiveKey, NodeId> = HashMap::new();

        for ((_, build), entry) in &node.transitive {
            let Some(dep_id) = entry.node else {
                continue;
            };
            let dep = graph.node(dep_id);

            for capability in dep.provides() {
                if node.provides().contains(capability) {
                    return Err(provides_conflict(graph, capability, node.id(), dep_id));
                }

                let key = (capability.clone(), *build);
                if let Some(existing) = node.transitive.get(&key).and_then(|e| e.node) {
                    if existing != dep_id {
                        return Err(provides_conflict(graph, capability, existing, dep_id));
                    }
                }
                match providers.get(&key) {
                    Some(other) if *other != dep_id => {
                        return Err(provides_conflict(graph, capability, *other, dep_id));
                    }
                    _ => {
                        providers.insert(key, dep_id);
                    }
                }
            }
        }
    }
    Ok(())
}

fn provides_conflict(graph: &DepsGraph, capability: &str, node: NodeId, other: NodeId) -> GraphError {
    GraphError::ProvidesConflict {
        capability: capability.to_string(),
        node: graph.label(node),
        other: graph.label(other),
    }
}
