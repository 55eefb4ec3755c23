// src/graph/node.rs

//! Graph nodes and their two-phase construction

use super::collaborators::RecipeEvaluator;
use super::recipe::{Context, Options, Profile, Recipe, Settings};
use super::requirement::Requirement;
use super::{EdgeId, NodeId};
use crate::error::Result;
use crate::reference::RecipeReference;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Name used for a node without reference
pub const CONSUMER_LABEL: &str = "consumer";

/// Where a node's recipe came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipeStatus {
    /// The root being resolved
    Consumer,
    /// Found in the local cache
    Cache,
    /// Points to a user folder instead of the cache
    Editable,
    Downloaded,
    /// Replaced by a newer revision from a remote
    Updated,
    /// In the cache, but absent from the remote it was checked against
    MissingRemote,
}

/// Expansion progress of a node, moving forward only
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeState {
    /// Sealed, requirements not enqueued yet
    Unexpanded,
    /// Requirements enqueued, some not resolved yet
    Expanding,
    /// Every requirement resolved, dependencies closed too
    Closed,
}

/// What a node knows about one package reachable from it
#[derive(Debug, Clone)]
pub(crate) struct TransitiveEntry {
    pub requirement: Requirement,
    /// `None` while the requirement is only declared
    pub node: Option<NodeId>,
}

/// Packages are tracked per name and per kind of requirement
pub(crate) type TransitiveKey = (String, bool);

pub(crate) fn transitive_key(requirement: &Requirement) -> TransitiveKey {
    (requirement.name().to_string(), requirement.build)
}

/// A resolved package instance
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    reference: Option<RecipeReference>,
    requirements: Vec<Requirement>,
    settings: Settings,
    settings_build: Settings,
    settings_target: Option<Settings>,
    options: Options,
    context: Context,
    status: RecipeStatus,
    remote: Option<String>,
    provides: Vec<String>,
    pub(crate) state: NodeState,
    pub(crate) pending: usize,
    pub(crate) dependencies: Vec<EdgeId>,
    pub(crate) dependants: Vec<EdgeId>,
    pub(crate) transitive: BTreeMap<TransitiveKey, TransitiveEntry>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn reference(&self) -> Option<&RecipeReference> {
        self.reference.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.reference.as_ref().map(RecipeReference::name)
    }

    /// `name/version[@user/channel]`, or [`CONSUMER_LABEL`]
    pub fn display_name(&self) -> String {
        match &self.reference {
            Some(reference) => reference.to_string(),
            None => CONSUMER_LABEL.to_string(),
        }
    }

    /// Requirements declared by the recipe, in declaration order
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_build(&self) -> &Settings {
        &self.settings_build
    }

    /// Settings of the platform the binaries built by this tool will target
    pub fn settings_target(&self) -> Option<&Settings> {
        self.settings_target.as_ref()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn context(&self) -> Context {
        self.context
    }

    pub fn status(&self) -> RecipeStatus {
        self.status
    }

    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref()
    }

    pub fn provides(&self) -> &[String] {
        &self.provides
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Outgoing edges, in resolution order
    pub fn dependencies(&self) -> &[EdgeId] {
        &self.dependencies
    }

    /// Incoming edges; the first one created this node
    pub fn dependants(&self) -> &[EdgeId] {
        &self.dependants
    }

    pub(crate) fn advance(&mut self, state: NodeState) {
        if state > self.state {
            self.state = state;
        }
    }
}

/// Builds a [`Node`] in two phases
///
/// The identity (recipe, context, status) is fixed by [`NodeBuilder::new`].
/// Configuration steps are then applied in order and the result is sealed
/// into an immutable node.
#[derive(Debug)]
pub struct NodeBuilder {
    recipe: Recipe,
    status: RecipeStatus,
    remote: Option<String>,
    settings_build: Settings,
    settings_target: Option<Settings>,
}

impl NodeBuilder {
    pub fn new(mut recipe: Recipe, context: Context, status: RecipeStatus) -> Self {
        recipe.context = context;
        Self {
            recipe,
            status,
            remote: None,
            settings_build: Settings::new(),
            settings_target: None,
        }
    }

    pub fn remote(mut self, remote: Option<String>) -> Self {
        self.remote = remote;
        self
    }

    /// Profile settings for this node's context, overridden by the recipe's
    pub fn profile_settings(mut self, profile: &Profile) -> Self {
        self.recipe.settings = profile.settings.merged_with(&self.recipe.settings);
        self
    }

    pub fn settings_build(mut self, settings: Settings) -> Self {
        self.settings_build = settings;
        self
    }

    pub fn settings_target(mut self, settings: Option<Settings>) -> Self {
        self.settings_target = settings;
        self
    }

    /// Apply the options the consumer sets for this package
    pub fn apply_downstream_options(mut self, downstream: &Options) -> Self {
        if let Some(name) = self.recipe.reference.as_ref().map(|r| r.name().to_string()) {
            self.recipe.options.apply_downstream(&name, downstream);
        }
        self
    }

    /// Add the profile's build requirements whose pattern matches this node
    ///
    /// An injected tool replaces a declared build requirement of the same
    /// package. A tool is never injected into itself.
    pub fn inject_build_requires(mut self, profile: &Profile) -> Self {
        let is_consumer = self.status == RecipeStatus::Consumer;
        let label = self
            .recipe
            .reference
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_default();

        for (pattern, tools) in &profile.build_requires {
            let matches = match pattern.as_str() {
                "&" => is_consumer,
                "&!" => !is_consumer,
                _ if label.is_empty() => false,
                glob_pattern => match glob::Pattern::new(glob_pattern) {
                    Ok(compiled) => compiled.matches(&label),
                    Err(e) => {
                        warn!("Ignoring invalid build-requires pattern '{}': {}", glob_pattern, e);
                        false
                    }
                },
            };
            if !matches {
                continue;
            }

            for tool in tools {
                if tool.to_string() == label {
                    continue;
                }
                match Requirement::new(tool.clone()) {
                    Ok(requirement) => {
                        debug!("Injecting build requirement {} into {}", tool, label);
                        self.recipe.add_requirement(requirement.with_build());
                    }
                    Err(e) => warn!("Ignoring build requirement {}: {}", tool, e),
                }
            }
        }
        self
    }

    /// Run the recipe's configuration hook
    pub fn configure(mut self, evaluator: &dyn RecipeEvaluator) -> Result<Self> {
        evaluator.configure(&mut self.recipe)?;
        Ok(self)
    }

    /// Freeze the configuration into a node
    ///
    /// Every declared requirement is recorded as a transitive entry without
    /// node, so versions pinned here apply to the whole subgraph.
    pub fn seal(self) -> Node {
        let transitive = self
            .recipe
            .requirements
            .iter()
            .map(|r| {
                (
                    transitive_key(r),
                    TransitiveEntry {
                        requirement: r.clone(),
                        node: None,
                    },
                )
            })
            .collect();

        Node {
            id: NodeId(0),
            reference: self.recipe.reference,
            requirements: self.recipe.requirements,
            settings: self.recipe.settings,
            settings_build: self.settings_build,
            settings_target: self.settings_target,
            options: self.recipe.options,
            context: self.recipe.context,
            status: self.status,
            remote: self.remote,
            provides: self.recipe.provides,
            state: NodeState::Unexpanded,
            pending: 0,
            dependencies: Vec::new(),
            dependants: Vec::new(),
            transitive,
        }
    }
}
