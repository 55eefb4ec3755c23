// src/graph/collaborators.rs

//! Interfaces to the components that fetch and evaluate recipes
//!
//! The resolver never touches the network, the cache or recipe code
//! directly. Callers plug those in through these traits.

use super::node::RecipeStatus;
use super::recipe::{Profile, Recipe};
use super::requirement::Requirement;
use crate::error::Result;
use crate::reference::RecipeReference;
use std::path::{Path, PathBuf};

/// A recipe located by a [`RecipeProxy`]
#[derive(Debug, Clone)]
pub struct ResolvedRecipe {
    /// Recipe file to hand to the evaluator
    pub path: PathBuf,
    pub status: RecipeStatus,
    /// Remote the recipe came from, if any
    pub remote: Option<String>,
    /// The reference that was found, usually carrying its revision
    pub reference: RecipeReference,
}

/// Locates recipes in the local cache or on remotes
pub trait RecipeProxy {
    fn get_recipe(
        &self,
        reference: &RecipeReference,
        check_updates: bool,
        update: bool,
        remotes: &[String],
    ) -> Result<ResolvedRecipe>;
}

/// Picks a concrete reference satisfying a version range
pub trait RangeResolver {
    /// `consumer` names the node declaring the requirement, for diagnostics
    fn resolve(
        &self,
        requirement: &Requirement,
        consumer: &str,
        update: bool,
        remotes: &[String],
    ) -> Result<RecipeReference>;
}

/// Outcome of evaluating a recipe file
#[derive(Debug, Clone)]
pub enum LoadedRecipe {
    Recipe(Recipe),
    /// The recipe only forwards to another reference
    Alias(RecipeReference),
}

/// Runs recipe code
pub trait RecipeEvaluator {
    /// Evaluate the recipe at `path` for `profile`
    fn load(&self, path: &Path, reference: &RecipeReference, profile: &Profile)
    -> Result<LoadedRecipe>;

    /// Configuration hook, run once downstream options have been applied and
    /// before the requirements are expanded
    fn configure(&self, recipe: &mut Recipe) -> Result<()> {
        let _ = recipe;
        Ok(())
    }
}
