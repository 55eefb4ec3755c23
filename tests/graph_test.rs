// tests/graph_test.rs

//! Integration tests for dependency graph resolution
//!
//! Recipes come from an in-memory index standing in for the cache, the
//! remotes and the recipe evaluator.

use conary_deps::graph::{
    BuildOptions, Context, DepsGraph, GraphBuilder, GraphError, LoadedRecipe, NodeState, Profile,
    RangeResolver, Recipe, RecipeEvaluator, RecipeProxy, RecipeStatus, Requirement,
    ResolvedRecipe, Settings,
};
use conary_deps::reference::RecipeReference;
use conary_deps::{Error, Result};
use std::cell::Cell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

enum Entry {
    Recipe(Recipe),
    Alias(RecipeReference),
}

/// Recipes indexed by `name/version`
#[derive(Default)]
struct Index {
    entries: HashMap<String, Entry>,
    configured: Cell<usize>,
}

impl Index {
    fn add(&mut self, reference: &str, requires: &[&str]) -> &mut Self {
        let mut recipe = Recipe::new(RecipeReference::parse(reference).unwrap());
        for r in requires {
            recipe.add_requirement(Requirement::parse(r).unwrap());
        }
        self.add_recipe(recipe)
    }

    fn add_recipe(&mut self, recipe: Recipe) -> &mut Self {
        let key = recipe.reference.as_ref().unwrap().to_string();
        self.entries.insert(key, Entry::Recipe(recipe));
        self
    }

    fn alias(&mut self, alias: &str, target: &str) -> &mut Self {
        self.entries.insert(
            alias.to_string(),
            Entry::Alias(RecipeReference::parse(target).unwrap()),
        );
        self
    }

    fn graph_for(&self, root: Recipe) -> DepsGraph {
        self.graph_with(root, &BuildOptions::default(), &host_profile(), &build_profile())
    }

    fn graph_with(
        &self,
        root: Recipe,
        options: &BuildOptions,
        host: &Profile,
        build: &Profile,
    ) -> DepsGraph {
        GraphBuilder::new(self, self, self).load_graph(root, host, build, options)
    }
}

impl RecipeProxy for Index {
    fn get_recipe(
        &self,
        reference: &RecipeReference,
        _check_updates: bool,
        _update: bool,
        _remotes: &[String],
    ) -> Result<ResolvedRecipe> {
        let key = reference.without_revision().to_string();
        if !self.entries.contains_key(&key) {
            return Err(Error::NotFound(key));
        }
        Ok(ResolvedRecipe {
            path: PathBuf::from("/recipes").join(reference.dir_repr()),
            status: RecipeStatus::Cache,
            remote: None,
            reference: reference.clone(),
        })
    }
}

impl RangeResolver for Index {
    fn resolve(
        &self,
        requirement: &Requirement,
        _consumer: &str,
        _update: bool,
        _remotes: &[String],
    ) -> Result<RecipeReference> {
        let range = requirement.range().unwrap();
        self.entries
            .keys()
            .filter_map(|key| RecipeReference::parse(key).ok())
            .filter(|r| r.name() == requirement.name() && range.satisfies(&r.version()))
            .max_by_key(|r| r.version().to_semver())
            .ok_or_else(|| {
                Error::Recipe(format!("Version range '{}' not satisfied", requirement))
            })
    }
}

impl RecipeEvaluator for Index {
    fn load(
        &self,
        _path: &Path,
        reference: &RecipeReference,
        _profile: &Profile,
    ) -> Result<LoadedRecipe> {
        match self.entries.get(&reference.without_revision().to_string()) {
            Some(Entry::Recipe(recipe)) => Ok(LoadedRecipe::Recipe(recipe.clone())),
            Some(Entry::Alias(target)) => Ok(LoadedRecipe::Alias(target.clone())),
            None => Err(Error::NotFound(reference.to_string())),
        }
    }

    fn configure(&self, _recipe: &mut Recipe) -> Result<()> {
        self.configured.set(self.configured.get() + 1);
        Ok(())
    }
}

fn host_profile() -> Profile {
    Profile::new(Settings::new().with("os", "Windows").with("arch", "armv8"))
}

fn build_profile() -> Profile {
    Profile::new(Settings::new().with("os", "Linux").with("arch", "x86_64"))
}

fn consumer(requires: &[&str]) -> Recipe {
    let mut recipe = Recipe::consumer();
    for r in requires {
        recipe.add_requirement(Requirement::parse(r).unwrap());
    }
    recipe
}

fn single<'a>(graph: &'a DepsGraph, name: &str) -> &'a conary_deps::graph::Node {
    let nodes: Vec<_> = graph.nodes_named(name).collect();
    assert_eq!(nodes.len(), 1, "expected one {} node", name);
    nodes[0]
}

#[test]
fn test_diamond_converges_on_one_node() {
    let mut index = Index::default();
    index
        .add("liba/1.0", &["libc/1.0"])
        .add("libb/1.0", &["libc/1.0"])
        .add("libc/1.0", &[]);

    let graph = index.graph_for(consumer(&["liba/1.0", "libb/1.0"]));

    assert!(graph.is_ok(), "{:?}", graph.error);
    assert_eq!(graph.nodes().len(), 4);
    let libc = single(&graph, "libc");
    assert_eq!(libc.dependants().len(), 2);
    assert!(graph.nodes().iter().all(|n| n.state() == NodeState::Closed));
}

#[test]
fn test_diamond_version_conflict() {
    let mut index = Index::default();
    index
        .add("liba/1.0", &["libc/1.0"])
        .add("libb/1.0", &["libc/2.0"])
        .add("libc/1.0", &[])
        .add("libc/2.0", &[]);

    let graph = index.graph_for(consumer(&["liba/1.0", "libb/1.0"]));

    match &graph.error {
        Some(err @ GraphError::Conflict {
            node,
            prev_consumer,
            prev_node,
            ..
        }) => {
            assert_eq!(node.name, "libb/1.0");
            assert_eq!(prev_consumer.name, "liba/1.0");
            assert_eq!(prev_node.as_ref().unwrap().name, "libc/1.0");
            let message = err.to_string();
            assert!(message.contains("libb/1.0 => libc/2.0"), "{}", message);
            assert!(message.contains("liba/1.0 => libc/1.0"), "{}", message);
        }
        other => panic!("expected a version conflict, got {:?}", other),
    }

    // The partial graph is still available
    assert_eq!(graph.nodes_named("libc").count(), 1);
    assert_eq!(graph.nodes_named("libb").count(), 1);
}

#[test]
fn test_range_accepts_resolved_version() {
    let mut index = Index::default();
    index
        .add("liba/1.0", &["libc/1.5"])
        .add("libb/1.0", &["libc/[>=1.0,<2.0]"])
        .add("libc/1.5", &[])
        .add("libc/1.9", &[]);

    let graph = index.graph_for(consumer(&["liba/1.0", "libb/1.0"]));

    assert!(graph.is_ok(), "{:?}", graph.error);
    let libc = single(&graph, "libc");
    assert_eq!(libc.reference().unwrap().version_str(), "1.5");

    let from_b = graph
        .edges()
        .iter()
        .find(|e| graph.node(e.src).name() == Some("libb"))
        .unwrap();
    assert_eq!(from_b.requirement.reference().version_str(), "1.5");
    assert!(from_b.requirement.range().is_none());
}

#[test]
fn test_range_rejects_out_of_range_version() {
    let mut index = Index::default();
    index
        .add("liba/1.0", &["libc/2.5"])
        .add("libb/1.0", &["libc/[>=1.0,<2.0]"])
        .add("libc/1.5", &[])
        .add("libc/2.5", &[]);

    let graph = index.graph_for(consumer(&["liba/1.0", "libb/1.0"]));
    assert!(matches!(graph.error, Some(GraphError::Conflict { .. })));
}

#[test]
fn test_range_picks_highest_match() {
    let mut index = Index::default();
    index
        .add("libc/1.5", &[])
        .add("libc/1.9", &[])
        .add("libc/2.5", &[]);

    let graph = index.graph_for(consumer(&["libc/[>=1.0 <2.0]"]));

    assert!(graph.is_ok(), "{:?}", graph.error);
    assert_eq!(
        single(&graph, "libc").reference().unwrap().version_str(),
        "1.9"
    );
}

#[test]
fn test_self_requirement_is_a_loop() {
    let mut index = Index::default();
    index.add("liba/1.0", &["liba/1.0"]);

    let graph = index.graph_for(consumer(&["liba/1.0"]));
    assert!(matches!(graph.error, Some(GraphError::Loop { .. })));
}

#[test]
fn test_transitive_loop_terminates() {
    let mut index = Index::default();
    index
        .add("liba/1.0", &["libb/1.0"])
        .add("libb/1.0", &["libc/1.0"])
        .add("libc/1.0", &["liba/1.0"]);

    let graph = index.graph_for(consumer(&["liba/1.0"]));

    match &graph.error {
        Some(GraphError::Loop { node, ancestor, .. }) => {
            assert_eq!(node.name, "libc/1.0");
            assert_eq!(ancestor.name, "liba/1.0");
        }
        other => panic!("expected a loop, got {:?}", other),
    }
    assert_eq!(graph.nodes().len(), 4);
}

#[test]
fn test_loop_through_private_requirement_terminates() {
    let mut index = Index::default();
    index
        .add_recipe(
            Recipe::new(RecipeReference::parse("liba/1.0").unwrap())
                .with_requirement(Requirement::parse("libb/1.0").unwrap().with_private()),
        )
        .add("libb/1.0", &["liba/1.0"]);

    let graph = index.graph_for(consumer(&["liba/1.0"]));

    match &graph.error {
        Some(GraphError::Loop { node, ancestor, .. }) => {
            assert_eq!(node.name, "libb/1.0");
            assert_eq!(ancestor.name, "liba/1.0");
        }
        other => panic!("expected a loop, got {:?}", other),
    }
    assert_eq!(graph.nodes().len(), 3);
}

#[test]
fn test_loop_through_build_requirement_terminates() {
    let mut index = Index::default();
    index
        .add_recipe(
            Recipe::new(RecipeReference::parse("liba/1.0").unwrap())
                .with_requirement(Requirement::parse("tool/1.0").unwrap().with_build()),
        )
        .add("tool/1.0", &["liba/1.0"]);

    let graph = index.graph_for(consumer(&["liba/1.0"]));

    // The tool needs liba in the build context, whose tool is the running one
    match &graph.error {
        Some(GraphError::Loop { ancestor, .. }) => {
            assert_eq!(ancestor.name, "tool/1.0");
        }
        other => panic!("expected a loop, got {:?}", other),
    }
    assert!(graph.nodes().len() <= 4);
}

#[test]
fn test_override_forces_version() {
    let mut index = Index::default();
    index
        .add("liba/1.0", &["libc/1.0"])
        .add("libc/1.0", &[])
        .add("libc/2.0", &[]);

    let root = consumer(&["liba/1.0"])
        .with_requirement(Requirement::parse("libc/2.0").unwrap().with_override());
    let graph = index.graph_for(root);

    assert!(graph.is_ok(), "{:?}", graph.error);
    assert_eq!(
        single(&graph, "libc").reference().unwrap().version_str(),
        "2.0"
    );
}

#[test]
fn test_direct_requirement_without_override_conflicts() {
    let mut index = Index::default();
    index
        .add("liba/1.0", &["libc/1.0"])
        .add("libc/1.0", &[])
        .add("libc/2.0", &[]);

    let graph = index.graph_for(consumer(&["liba/1.0", "libc/2.0"]));

    match &graph.error {
        Some(GraphError::Conflict {
            prev_node,
            base_previous,
            ..
        }) => {
            assert!(prev_node.is_none());
            assert_eq!(base_previous.name, conary_deps::graph::CONSUMER_LABEL);
        }
        other => panic!("expected a version conflict, got {:?}", other),
    }
}

#[test]
fn test_option_conflict() {
    let mut index = Index::default();
    index
        .add("liba/1.0", &["zlib/1.2.11"])
        .add_recipe(
            Recipe::new(RecipeReference::parse("libb/1.0").unwrap())
                .with_requirement(Requirement::parse("zlib/1.2.11").unwrap())
                .with_dependency_option("zlib", "shared", "True"),
        )
        .add_recipe(
            Recipe::new(RecipeReference::parse("zlib/1.2.11").unwrap())
                .with_option("shared", "False"),
        );

    let graph = index.graph_for(consumer(&["liba/1.0", "libb/1.0"]));

    match &graph.error {
        Some(GraphError::ConflictConfig {
            option,
            prev_value,
            value,
            node,
            ..
        }) => {
            assert_eq!(option, "shared");
            assert_eq!(prev_value, "False");
            assert_eq!(value, "True");
            assert_eq!(node.name, "libb/1.0");
        }
        other => panic!("expected a configuration conflict, got {:?}", other),
    }
}

#[test]
fn test_downstream_options_apply_to_new_nodes() {
    let mut index = Index::default();
    index.add_recipe(
        Recipe::new(RecipeReference::parse("zlib/1.2.11").unwrap()).with_option("shared", "False"),
    );

    let root = consumer(&["zlib/1.2.11"]).with_dependency_option("zlib", "shared", "True");
    let graph = index.graph_for(root);

    assert!(graph.is_ok(), "{:?}", graph.error);
    assert_eq!(single(&graph, "zlib").options().value("shared"), Some("True"));
}

#[test]
fn test_build_requirement_switches_context() {
    let mut index = Index::default();
    index
        .add("cmake/3.27.1", &["openssl/3.0.8"])
        .add("openssl/3.0.8", &[])
        .add("liba/1.0", &[]);

    let root = consumer(&["liba/1.0"])
        .with_requirement(Requirement::parse("cmake/3.27.1").unwrap().with_build());
    let graph = index.graph_for(root);
    assert!(graph.is_ok(), "{:?}", graph.error);

    let liba = single(&graph, "liba");
    assert_eq!(liba.context(), Context::Host);
    assert_eq!(liba.settings().get("os"), Some("Windows"));
    assert!(liba.settings_target().is_none());

    let cmake = single(&graph, "cmake");
    assert_eq!(cmake.context(), Context::Build);
    assert_eq!(cmake.settings().get("os"), Some("Linux"));
    assert_eq!(cmake.settings_build().get("os"), Some("Linux"));
    assert_eq!(cmake.settings_target().unwrap().get("os"), Some("Windows"));

    // Requirements of a tool stay in the build context
    let openssl = single(&graph, "openssl");
    assert_eq!(openssl.context(), Context::Build);
    assert_eq!(openssl.settings_target().unwrap().get("os"), Some("Windows"));
}

#[test]
fn test_settings_target_not_populated_on_request() {
    let mut index = Index::default();
    index
        .add("cmake/3.27.1", &["openssl/3.0.8"])
        .add("openssl/3.0.8", &[]);

    let root =
        consumer(&[]).with_requirement(Requirement::parse("cmake/3.27.1").unwrap().with_build());
    let options = BuildOptions {
        populate_settings_target: false,
        ..Default::default()
    };
    let graph = index.graph_with(root, &options, &host_profile(), &build_profile());

    assert!(graph.is_ok(), "{:?}", graph.error);
    assert!(single(&graph, "cmake").settings_target().is_some());
    assert!(single(&graph, "openssl").settings_target().is_none());
}

#[test]
fn test_same_package_in_both_contexts() {
    let mut index = Index::default();
    index.add("protobuf/3.21.12", &[]);

    let root = consumer(&["protobuf/3.21.12"])
        .with_requirement(Requirement::parse("protobuf/3.21.12").unwrap().with_build());
    let graph = index.graph_for(root);

    assert!(graph.is_ok(), "{:?}", graph.error);
    let contexts: Vec<Context> = graph.nodes_named("protobuf").map(|n| n.context()).collect();
    assert_eq!(contexts, vec![Context::Host, Context::Build]);
}

#[test]
fn test_profile_build_requires_are_injected() {
    let mut index = Index::default();
    index
        .add("liba/1.0", &[])
        .add("cmake/3.27.1", &[])
        .add("ninja/1.11.1", &[]);

    let host = host_profile()
        .with_build_requires("&", vec![RecipeReference::parse("cmake/3.27.1").unwrap()])
        .with_build_requires("liba/*", vec![RecipeReference::parse("ninja/1.11.1").unwrap()]);
    let graph = index.graph_with(
        consumer(&["liba/1.0"]),
        &BuildOptions::default(),
        &host,
        &build_profile(),
    );

    assert!(graph.is_ok(), "{:?}", graph.error);
    assert_eq!(single(&graph, "cmake").context(), Context::Build);
    let ninja = single(&graph, "ninja");
    assert_eq!(graph.creator(ninja.id()), Some(single(&graph, "liba").id()));
}

#[test]
fn test_alias_is_followed() {
    let mut index = Index::default();
    index
        .alias("zlib/latest", "zlib/1.2.13")
        .add("zlib/1.2.13", &[]);

    let graph = index.graph_for(consumer(&["zlib/latest"]));

    assert!(graph.is_ok(), "{:?}", graph.error);
    assert_eq!(
        single(&graph, "zlib").reference().unwrap().version_str(),
        "1.2.13"
    );
    let alias = RecipeReference::parse("zlib/latest").unwrap();
    assert_eq!(graph.aliased.get(&alias).unwrap().version_str(), "1.2.13");
}

#[test]
fn test_alias_converges_with_fixed_version() {
    let mut index = Index::default();
    index
        .alias("zlib/latest", "zlib/1.2.13")
        .add("zlib/1.2.13", &[])
        .add("liba/1.0", &["zlib/1.2.13"])
        .add("libb/1.0", &["zlib/latest"]);

    let graph = index.graph_for(consumer(&["liba/1.0", "libb/1.0"]));

    assert!(graph.is_ok(), "{:?}", graph.error);
    assert_eq!(single(&graph, "zlib").dependants().len(), 2);
}

#[test]
fn test_alias_loop_is_reported() {
    let mut index = Index::default();
    index
        .alias("zlib/latest", "zlib/current")
        .alias("zlib/current", "zlib/latest");

    let graph = index.graph_for(consumer(&["zlib/latest"]));

    match &graph.error {
        Some(GraphError::Missing { message, .. }) => {
            assert!(message.contains("Alias loop"), "{}", message);
        }
        other => panic!("expected an alias loop, got {:?}", other),
    }
}

#[test]
fn test_missing_recipe() {
    let index = Index::default();
    let graph = index.graph_for(consumer(&["nothere/1.0"]));

    match &graph.error {
        Some(GraphError::Missing { require, .. }) => {
            assert_eq!(require.name(), "nothere");
        }
        other => panic!("expected a missing recipe, got {:?}", other),
    }
    assert_eq!(graph.nodes().len(), 1);
}

#[test]
fn test_provides_conflict() {
    let mut index = Index::default();
    index.add("openssl/3.0.8", &[]).add_recipe(
        Recipe::new(RecipeReference::parse("boringssl/1.0").unwrap()).with_provides("openssl"),
    );

    let graph = index.graph_for(consumer(&["openssl/3.0.8", "boringssl/1.0"]));

    match &graph.error {
        Some(GraphError::ProvidesConflict {
            capability,
            node,
            other,
        }) => {
            assert_eq!(capability, "openssl");
            assert_eq!(node.name, "openssl/3.0.8");
            assert_eq!(other.name, "boringssl/1.0");
        }
        other => panic!("expected a provides conflict, got {:?}", other),
    }
}

#[test]
fn test_configure_hook_runs_once_per_new_node() {
    let mut index = Index::default();
    index
        .add("liba/1.0", &["libc/1.0"])
        .add("libb/1.0", &["libc/1.0"])
        .add("libc/1.0", &[]);

    let graph = index.graph_for(consumer(&["liba/1.0", "libb/1.0"]));

    assert!(graph.is_ok(), "{:?}", graph.error);
    assert_eq!(index.configured.get(), 3);
}

#[test]
fn test_depth_first_expansion_order() {
    let mut index = Index::default();
    index
        .add("liba/1.0", &["libx/1.0", "liby/1.0"])
        .add("libb/1.0", &[])
        .add("libx/1.0", &[])
        .add("liby/1.0", &[]);

    let graph = index.graph_for(consumer(&["liba/1.0", "libb/1.0"]));

    assert!(graph.is_ok(), "{:?}", graph.error);
    let order: Vec<String> = graph
        .nodes()
        .iter()
        .skip(1)
        .map(|n| n.name().unwrap().to_string())
        .collect();
    assert_eq!(order, vec!["liba", "libx", "liby", "libb"]);
}
