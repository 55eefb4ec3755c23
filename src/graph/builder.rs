// src/graph/builder.rs

//! Graph expansion
//!
//! Requirements are expanded depth-first, left to right: the requirements of
//! a new node go to the front of the work list in declaration order. The
//! order decides which conflict is reported first, so it must not change.

use super::collaborators::{LoadedRecipe, RangeResolver, RecipeEvaluator, RecipeProxy, ResolvedRecipe};
use super::node::{NodeBuilder, RecipeStatus};
use super::recipe::{Context, Profile, Recipe};
use super::requirement::Requirement;
use super::{DepsGraph, GraphError, NodeId, Previous, provides};
use crate::error::{Error, Result};
use crate::reference::RecipeReference;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info, warn};

/// Knobs for [`GraphBuilder::load_graph`]
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Ask remotes whether cached recipes are outdated
    pub check_updates: bool,
    /// Fetch newer recipes when found; implies `check_updates`
    pub update: bool,
    /// Remotes to search, in order
    pub remotes: Vec<String>,
    /// Let nodes without context switch inherit their consumer's
    /// `settings_target`
    pub populate_settings_target: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            check_updates: false,
            update: false,
            remotes: Vec::new(),
            populate_settings_target: true,
        }
    }
}

/// State shared by every step of one `load_graph` call
struct Session<'p> {
    host: &'p Profile,
    build: &'p Profile,
    options: BuildOptions,
}

impl Session<'_> {
    fn profile(&self, context: Context) -> &Profile {
        match context {
            Context::Host => self.host,
            Context::Build => self.build,
        }
    }
}

/// Expands a root recipe into a [`DepsGraph`]
pub struct GraphBuilder<'a> {
    proxy: &'a dyn RecipeProxy,
    resolver: &'a dyn RangeResolver,
    evaluator: &'a dyn RecipeEvaluator,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        proxy: &'a dyn RecipeProxy,
        resolver: &'a dyn RangeResolver,
        evaluator: &'a dyn RecipeEvaluator,
    ) -> Self {
        Self {
            proxy,
            resolver,
            evaluator,
        }
    }

    /// Resolve the full dependency graph of `root`
    ///
    /// `root` is taken as already evaluated. The first failure is stored in
    /// [`DepsGraph::error`] and the graph built so far is returned.
    pub fn load_graph(
        &self,
        root: Recipe,
        profile_host: &Profile,
        profile_build: &Profile,
        options: &BuildOptions,
    ) -> DepsGraph {
        let mut options = options.clone();
        options.check_updates |= options.update;
        let session = Session {
            host: profile_host,
            build: profile_build,
            options,
        };

        let root_node = NodeBuilder::new(root, Context::Host, RecipeStatus::Consumer)
            .profile_settings(profile_host)
            .settings_build(profile_build.settings.clone())
            .settings_target(None)
            .inject_build_requires(profile_host)
            .seal();

        let mut graph = DepsGraph::new();
        let root_id = graph.add_node(root_node);
        info!("Loading dependency graph for {}", graph.label(root_id));

        let mut open: VecDeque<(Requirement, NodeId)> = graph
            .node(root_id)
            .requirements()
            .iter()
            .map(|r| (r.clone(), root_id))
            .collect();
        graph.begin_expansion(root_id);

        while let Some((requirement, node)) = open.pop_front() {
            match self.expand_require(&mut graph, requirement, node, &session) {
                Ok(Some(new_node)) => {
                    for r in graph.node(new_node).requirements().iter().rev() {
                        open.push_front((r.clone(), new_node));
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Dependency graph resolution failed: {}", e);
                    graph.error = Some(e);
                    return graph;
                }
            }
        }

        if let Err(e) = provides::check_graph_provides(&graph) {
            warn!("Dependency graph resolution failed: {}", e);
            graph.error = Some(e);
            return graph;
        }

        info!("Dependency graph resolved with {} nodes", graph.nodes().len());
        graph
    }

    /// Handle one requirement of `node`
    ///
    /// Either closes a diamond with an existing node (returns `None`) or
    /// creates a new node (returned so its requirements get expanded).
    fn expand_require(
        &self,
        graph: &mut DepsGraph,
        mut requirement: Requirement,
        node: NodeId,
        session: &Session<'_>,
    ) -> std::result::Result<Option<NodeId>, GraphError> {
        debug!("Expanding {} => {}", graph.label(node), requirement);

        let mut prev_node = None;
        match graph.check_downstream_exists(node, &requirement) {
            None => {}
            Some(Previous::Loop { ancestor }) => {
                return Err(GraphError::Loop {
                    node: graph.label(node),
                    require: requirement,
                    ancestor: graph.label(ancestor),
                });
            }
            Some(Previous::Existing {
                requirement: prev_requirement,
                node: existing,
                base,
            }) => {
                let prev_ref = existing
                    .and_then(|id| graph.node(id).reference().cloned())
                    .unwrap_or_else(|| prev_requirement.reference().clone());

                if prev_requirement.force {
                    debug!("{} overridden to {}", requirement, prev_ref);
                    requirement = requirement.resolve_to(prev_ref);
                } else {
                    let previous = Conflicting {
                        requirement: &prev_requirement,
                        node: existing,
                        reference: &prev_ref,
                        base,
                    };
                    requirement =
                        self.check_version(graph, requirement, node, &previous, session)?;
                    if let Some(existing) = existing {
                        check_options(graph, &requirement, node, &previous, existing)?;
                    }
                }
                prev_node = existing;
            }
        }

        match prev_node {
            None => self.create_new_node(graph, requirement, node, session).map(Some),
            Some(existing) => {
                debug!("Closing diamond {} => {}", graph.label(node), graph.label(existing));
                graph.add_edge(node, existing, requirement.clone());
                graph.propagate_downstream(node, &requirement, existing);
                graph.requirement_done(node);
                Ok(None)
            }
        }
    }

    /// Check that `requirement` agrees with the version resolved earlier,
    /// returning it pinned when a range was satisfied
    fn check_version(
        &self,
        graph: &mut DepsGraph,
        requirement: Requirement,
        node: NodeId,
        previous: &Conflicting<'_>,
        session: &Session<'_>,
    ) -> std::result::Result<Requirement, GraphError> {
        let prev_range = if previous.node.is_none() {
            previous.requirement.range()
        } else {
            None
        };

        match (requirement.range().cloned(), prev_range) {
            // Both ranges: the current one is evaluated on its own
            (Some(_), Some(_)) => Ok(requirement),
            (Some(range), None) => {
                if range.satisfies(&previous.reference.version()) {
                    Ok(requirement.resolve_to(previous.reference.clone()))
                } else {
                    Err(conflict(graph, &requirement, node, previous))
                }
            }
            (None, Some(prev_range)) => {
                if prev_range.satisfies(&requirement.reference().version()) {
                    Ok(requirement)
                } else {
                    Err(conflict(graph, &requirement, node, previous))
                }
            }
            (None, None) => {
                let wanted = graph
                    .aliased
                    .get(&requirement.reference().without_revision())
                    .cloned()
                    .unwrap_or_else(|| requirement.reference().clone());
                if !conflicting_refs(previous.reference, &wanted) {
                    return Ok(requirement);
                }

                // The requested reference may be an alias of the previous one
                let profile = session.profile(context_for(graph, &requirement, node));
                let (resolved, _) = self
                    .resolve_recipe(graph, wanted, profile, session)
                    .map_err(|e| missing(graph, &requirement, node, e))?;
                if conflicting_refs(previous.reference, &resolved.reference) {
                    return Err(conflict(graph, &requirement, node, previous));
                }
                Ok(requirement)
            }
        }
    }

    /// Fetch and evaluate a recipe, following aliases
    fn resolve_recipe(
        &self,
        graph: &mut DepsGraph,
        reference: RecipeReference,
        profile: &Profile,
        session: &Session<'_>,
    ) -> Result<(ResolvedRecipe, Recipe)> {
        let original = reference.without_revision();
        let mut current = reference;
        let mut seen = HashSet::new();

        loop {
            if !seen.insert(current.without_revision()) {
                return Err(Error::Recipe(format!(
                    "Alias loop detected while resolving '{}' at '{}'",
                    original, current
                )));
            }

            let resolved = self.proxy.get_recipe(
                &current,
                session.options.check_updates,
                session.options.update,
                &session.options.remotes,
            )?;

            match self.evaluator.load(&resolved.path, &resolved.reference, profile)? {
                LoadedRecipe::Recipe(recipe) => return Ok((resolved, recipe)),
                LoadedRecipe::Alias(pointed) => {
                    debug!("{} is an alias of {}", resolved.reference, pointed);
                    let alias = resolved.reference.without_revision();
                    if alias != original {
                        graph.aliased.insert(original.clone(), pointed.clone());
                    }
                    graph.aliased.insert(alias, pointed.clone());
                    current = pointed;
                }
            }
        }
    }

    fn create_new_node(
        &self,
        graph: &mut DepsGraph,
        requirement: Requirement,
        node: NodeId,
        session: &Session<'_>,
    ) -> std::result::Result<NodeId, GraphError> {
        let consumer = graph.node(node);
        let consumer_context = consumer.context();
        let consumer_name = consumer.display_name();
        let consumer_options = consumer.options().clone();
        let consumer_target = consumer.settings_target().cloned();

        let context = context_for(graph, &requirement, node);
        let profile = session.profile(context);

        let target = match graph.aliased.get(&requirement.reference().without_revision()) {
            Some(pointed) => pointed.clone(),
            None if requirement.range().is_some() => self
                .resolver
                .resolve(
                    &requirement,
                    &consumer_name,
                    session.options.update,
                    &session.options.remotes,
                )
                .map_err(|e| missing(graph, &requirement, node, e))?,
            None => requirement.reference().clone(),
        };
        let requirement = if requirement.range().is_some() {
            requirement.resolve_to(target.clone())
        } else {
            requirement
        };

        let (resolved, mut recipe) = self
            .resolve_recipe(graph, target, profile, session)
            .map_err(|e| missing(graph, &requirement, node, e))?;
        recipe.reference = Some(resolved.reference.clone());

        // A host node requiring a tool: the tool builds for the host platform
        let context_switch = consumer_context == Context::Host && requirement.build;
        let settings_target = if context_switch {
            Some(session.host.settings.clone())
        } else if session.options.populate_settings_target {
            consumer_target
        } else {
            None
        };

        let new_node = NodeBuilder::new(recipe, context, resolved.status)
            .remote(resolved.remote.clone())
            .profile_settings(profile)
            .settings_build(session.build.settings.clone())
            .settings_target(settings_target)
            .apply_downstream_options(&consumer_options)
            .inject_build_requires(profile)
            .configure(self.evaluator)
            .map_err(|e| missing(graph, &requirement, node, e))?
            .seal();

        let id = graph.add_node(new_node);
        debug!("New node {} for {} ({:?})", graph.label(id), requirement, context);
        graph.add_edge(node, id, requirement.clone());
        graph.propagate_downstream(node, &requirement, id);
        graph.begin_expansion(id);
        Ok(id)
    }
}

/// The earlier resolution a requirement is checked against
struct Conflicting<'r> {
    requirement: &'r Requirement,
    node: Option<NodeId>,
    reference: &'r RecipeReference,
    base: NodeId,
}

/// Build requirements run in the build context; others inherit the consumer's
fn context_for(graph: &DepsGraph, requirement: &Requirement, consumer: NodeId) -> Context {
    if requirement.build {
        Context::Build
    } else {
        graph.node(consumer).context()
    }
}

/// References conflict if they differ without revisions, or if both carry
/// different explicit revisions
fn conflicting_refs(a: &RecipeReference, b: &RecipeReference) -> bool {
    if a.without_revision() != b.without_revision() {
        return true;
    }
    matches!((a.revision(), b.revision()), (Some(x), Some(y)) if x != y)
}

/// Options `node` sets for the package must match the ones it was resolved with
fn check_options(
    graph: &DepsGraph,
    requirement: &Requirement,
    node: NodeId,
    previous: &Conflicting<'_>,
    existing: NodeId,
) -> std::result::Result<(), GraphError> {
    let Some(wanted) = graph.node(node).options().dependency_options(requirement.name()) else {
        return Ok(());
    };
    let resolved = graph.node(existing).options();

    for (option, value) in wanted {
        if let Some(prev_value) = resolved.value(option) {
            if prev_value != value {
                return Err(GraphError::ConflictConfig {
                    node: graph.label(node),
                    require: requirement.clone(),
                    prev_node: graph.label(existing),
                    prev_require: previous.requirement.clone(),
                    prev_consumer: graph.label(prev_consumer(graph, previous)),
                    option: option.clone(),
                    prev_value: prev_value.to_string(),
                    value: value.clone(),
                });
            }
        }
    }
    Ok(())
}

fn prev_consumer(graph: &DepsGraph, previous: &Conflicting<'_>) -> NodeId {
    previous
        .node
        .and_then(|id| graph.creator(id))
        .unwrap_or(previous.base)
}

fn conflict(
    graph: &DepsGraph,
    requirement: &Requirement,
    node: NodeId,
    previous: &Conflicting<'_>,
) -> GraphError {
    GraphError::Conflict {
        node: graph.label(node),
        require: requirement.clone(),
        prev_node: previous.node.map(|id| graph.label(id)),
        prev_require: previous.requirement.clone(),
        prev_consumer: graph.label(prev_consumer(graph, previous)),
        base_previous: graph.label(previous.base),
    }
}

fn missing(graph: &DepsGraph, requirement: &Requirement, node: NodeId, error: Error) -> GraphError {
    GraphError::Missing {
        node: graph.label(node),
        require: requirement.clone(),
        message: error.to_string(),
    }
}
