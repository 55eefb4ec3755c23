// src/graph/mod.rs

//! Dependency graph resolution
//!
//! The resolver turns a root recipe into a closed graph of packages:
//! - Diamonds converge on a single node per package and context
//! - Version ranges and overrides are reconciled, or reported as conflicts
//! - Build requirements are resolved in the build context
//!
//! Nodes live in an arena owned by [`DepsGraph`] and are addressed by
//! [`NodeId`]. The graph is never modified after [`GraphBuilder::load_graph`]
//! returns.

mod builder;
mod collaborators;
mod error;
mod node;
mod provides;
mod recipe;
mod requirement;

pub use builder::{BuildOptions, GraphBuilder};
pub use collaborators::{LoadedRecipe, RangeResolver, RecipeEvaluator, RecipeProxy, ResolvedRecipe};
pub use error::{GraphError, NodeLabel};
pub use node::{CONSUMER_LABEL, Node, NodeBuilder, NodeState, RecipeStatus};
pub use recipe::{Context, Options, Profile, Recipe, Settings};
pub use requirement::Requirement;

use crate::reference::RecipeReference;
use node::{TransitiveEntry, transitive_key};
use std::collections::HashMap;
use std::fmt;

/// Index of a node in its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index of an edge in its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(pub usize);

/// A resolved requirement between two nodes
#[derive(Debug, Clone)]
pub struct Edge {
    pub src: NodeId,
    pub dst: NodeId,
    pub requirement: Requirement,
}

/// What convergence detection found for a requirement
#[derive(Debug, Clone)]
pub(crate) enum Previous {
    /// The package is an ancestor still being expanded
    Loop { ancestor: NodeId },
    /// The package is already required further down the graph
    Existing {
        requirement: Requirement,
        /// `None` if it was declared but not expanded yet
        node: Option<NodeId>,
        /// Node whose transitive set holds the entry
        base: NodeId,
    },
}

/// A resolved dependency graph
#[derive(Debug, Default)]
pub struct DepsGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    /// Alias reference (without revision) to the reference it points to
    pub aliased: HashMap<RecipeReference, RecipeReference>,
    /// First resolution failure; the graph is partial when set
    pub error: Option<GraphError>,
}

impl DepsGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// The root node, created first
    pub fn root(&self) -> Option<&Node> {
        self.nodes.first()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Nodes whose reference has `name`
    pub fn nodes_named<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Node> + use<'a> {
        let name = name.to_string();
        self.nodes
            .iter()
            .filter(move |n| n.name() == Some(name.as_str()))
    }

    /// Direct dependencies of `id`, in resolution order
    pub fn dependencies_of(&self, id: NodeId) -> impl Iterator<Item = &Node> + '_ {
        self.node(id)
            .dependencies()
            .iter()
            .map(|edge| self.node(self.edge(*edge).dst))
    }

    /// The node whose requirement created `id`
    pub fn creator(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)
            .dependants()
            .first()
            .map(|edge| self.edge(*edge).src)
    }

    pub fn label(&self, id: NodeId) -> NodeLabel {
        NodeLabel {
            id,
            name: self.node(id).display_name(),
        }
    }

    pub(crate) fn add_node(&mut self, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.id = id;
        self.nodes.push(node);
        id
    }

    pub(crate) fn add_edge(&mut self, src: NodeId, dst: NodeId, requirement: Requirement) -> EdgeId {
        let id = EdgeId(self.edges.len());
        self.edges.push(Edge {
            src,
            dst,
            requirement,
        });
        self.nodes[src.0].dependencies.push(id);
        self.nodes[dst.0].dependants.push(id);
        id
    }

    /// Look for `requirement`'s package from `origin` towards the root
    ///
    /// An ancestor with the same name in the context the package would be
    /// created in is a loop, whatever edges lie in between. Otherwise each
    /// level's transitive set is checked, continuing to the node's creator
    /// while neither the requirement nor the traversed edge hides packages
    /// from downstream. Findings closer to the root win, since downstream
    /// pins and overrides have priority.
    pub(crate) fn check_downstream_exists(
        &self,
        origin: NodeId,
        requirement: &Requirement,
    ) -> Option<Previous> {
        if let Some(ancestor) = self.find_loop(origin, requirement) {
            return Some(Previous::Loop { ancestor });
        }

        let key = transitive_key(requirement);
        let mut found = None;
        let mut current = origin;

        loop {
            let node = self.node(current);

            if let Some(entry) = node.transitive.get(&key) {
                // At the origin an entry without node is this very declaration
                if current != origin || entry.node.is_some() {
                    found = Some(Previous::Existing {
                        requirement: entry.requirement.clone(),
                        node: entry.node,
                        base: current,
                    });
                }
            }

            if !requirement.is_visible_downstream() {
                break;
            }
            let Some(edge) = node.dependants().first() else {
                break;
            };
            let edge = self.edge(*edge);
            if !edge.requirement.is_visible_downstream() {
                break;
            }
            current = edge.src;
        }

        found
    }

    /// Ancestor of `origin` (itself included) that `requirement` would
    /// expand again
    ///
    /// A build requirement on a different version is a bootstrap, not a loop.
    fn find_loop(&self, origin: NodeId, requirement: &Requirement) -> Option<NodeId> {
        let context = if requirement.build {
            Context::Build
        } else {
            self.node(origin).context()
        };

        let mut current = Some(origin);
        while let Some(id) = current {
            let node = self.node(id);
            if let Some(reference) = node.reference() {
                let bootstrap = requirement.build
                    && reference.version_str() != requirement.reference().version_str();
                if reference.name() == requirement.name()
                    && node.context() == context
                    && !bootstrap
                {
                    return Some(id);
                }
            }
            current = self.creator(id);
        }
        None
    }

    /// Record that `requirement` of `origin` resolved to `target`, in
    /// `origin` and every node downstream that can see it
    pub(crate) fn propagate_downstream(
        &mut self,
        origin: NodeId,
        requirement: &Requirement,
        target: NodeId,
    ) {
        let key = transitive_key(requirement);
        let mut current = origin;

        loop {
            let node = &mut self.nodes[current.0];
            node.transitive
                .entry(key.clone())
                .and_modify(|entry| entry.node = Some(target))
                .or_insert_with(|| TransitiveEntry {
                    requirement: requirement.clone(),
                    node: Some(target),
                });

            if !requirement.is_visible_downstream() {
                break;
            }
            let Some(edge) = node.dependants.first().copied() else {
                break;
            };
            let edge = &self.edges[edge.0];
            if !edge.requirement.is_visible_downstream() {
                break;
            }
            current = edge.src;
        }
    }

    /// Mark `id` as expanding with its declared requirements pending
    pub(crate) fn begin_expansion(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.0];
        node.advance(NodeState::Expanding);
        node.pending = node.requirements().len();
        if node.pending == 0 {
            self.close(id);
        }
    }

    /// One requirement of `id` has been settled
    pub(crate) fn requirement_done(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.0];
        node.pending = node.pending.saturating_sub(1);
        if node.pending == 0 {
            self.close(id);
        }
    }

    /// Close `id`, and its creators once they have nothing left pending
    fn close(&mut self, id: NodeId) {
        let mut current = id;
        loop {
            self.nodes[current.0].advance(NodeState::Closed);
            let Some(creator) = self.creator(current) else {
                break;
            };
            let parent = &mut self.nodes[creator.0];
            parent.pending = parent.pending.saturating_sub(1);
            if parent.pending > 0 {
                break;
            }
            current = creator;
        }
    }
}
