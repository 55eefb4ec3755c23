// src/graph/recipe.rs

//! Evaluated recipes, settings, options and profiles

use super::requirement::Requirement;
use crate::reference::RecipeReference;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a node's binaries will run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    #[default]
    Host,
    Build,
}

/// Settings such as `os`, `arch` or `compiler`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings(BTreeMap<String, String>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries of `other` win over entries of `self`
    pub fn merged_with(&self, other: &Settings) -> Settings {
        let mut merged = self.clone();
        merged
            .0
            .extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Options of a recipe plus the options it sets on its dependencies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    values: BTreeMap<String, String>,
    dependencies: BTreeMap<String, BTreeMap<String, String>>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, option: &str, value: &str) {
        self.values.insert(option.to_string(), value.to_string());
    }

    /// Set `option` on dependency `package`
    pub fn set_dependency(&mut self, package: &str, option: &str, value: &str) {
        self.dependencies
            .entry(package.to_string())
            .or_default()
            .insert(option.to_string(), value.to_string());
    }

    pub fn value(&self, option: &str) -> Option<&str> {
        self.values.get(option).map(String::as_str)
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Options this recipe wants for dependency `package`
    pub fn dependency_options(&self, package: &str) -> Option<&BTreeMap<String, String>> {
        self.dependencies.get(package)
    }

    /// Apply the options a consumer sets for `package` (this recipe)
    ///
    /// Values for this recipe overwrite its own defaults. Values for other
    /// packages are handed further upstream, where the consumer's wishes win
    /// over this recipe's.
    pub fn apply_downstream(&mut self, package: &str, downstream: &Options) {
        for (package_name, options) in &downstream.dependencies {
            if package_name == package {
                self.values
                    .extend(options.iter().map(|(k, v)| (k.clone(), v.clone())));
            } else {
                self.dependencies
                    .entry(package_name.clone())
                    .or_default()
                    .extend(options.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
    }
}

/// Settings and profile build-requirements for one context
#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub settings: Settings,
    /// `(pattern, tools)`: `&` matches the consumer, `&!` every other
    /// package, anything else is a glob over `name/version[@user/channel]`
    pub build_requires: Vec<(String, Vec<RecipeReference>)>,
}

impl Profile {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            build_requires: Vec::new(),
        }
    }

    pub fn with_build_requires(mut self, pattern: &str, tools: Vec<RecipeReference>) -> Self {
        self.build_requires.push((pattern.to_string(), tools));
        self
    }
}

/// A recipe as seen by the resolver
#[derive(Debug, Clone, Default)]
pub struct Recipe {
    /// `None` for an anonymous consumer
    pub reference: Option<RecipeReference>,
    pub requirements: Vec<Requirement>,
    pub settings: Settings,
    pub options: Options,
    pub context: Context,
    /// Capabilities provided besides the recipe's own name
    pub provides: Vec<String>,
}

impl Recipe {
    pub fn new(reference: RecipeReference) -> Self {
        Self {
            reference: Some(reference),
            ..Default::default()
        }
    }

    /// An anonymous consumer, such as a project being built locally
    pub fn consumer() -> Self {
        Self::default()
    }

    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.add_requirement(requirement);
        self
    }

    pub fn with_option(mut self, option: &str, value: &str) -> Self {
        self.options.set(option, value);
        self
    }

    pub fn with_dependency_option(mut self, package: &str, option: &str, value: &str) -> Self {
        self.options.set_dependency(package, option, value);
        self
    }

    pub fn with_provides(mut self, capability: &str) -> Self {
        self.provides.push(capability.to_string());
        self
    }

    /// Declare a requirement, replacing an earlier one for the same package
    /// and kind
    pub fn add_requirement(&mut self, requirement: Requirement) {
        match self
            .requirements
            .iter_mut()
            .find(|r| r.name() == requirement.name() && r.build == requirement.build)
        {
            Some(existing) => *existing = requirement,
            None => self.requirements.push(requirement),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_merge() {
        let base = Settings::new().with("os", "Linux").with("arch", "x86_64");
        let merged = base.merged_with(&Settings::new().with("arch", "armv8"));
        assert_eq!(merged.get("os"), Some("Linux"));
        assert_eq!(merged.get("arch"), Some("armv8"));
    }

    #[test]
    fn test_downstream_options() {
        let mut consumer = Options::new();
        consumer.set_dependency("zlib", "shared", "True");
        consumer.set_dependency("bzip2", "fPIC", "False");

        let mut zlib = Options::new();
        zlib.set("shared", "False");
        zlib.set_dependency("bzip2", "fPIC", "True");
        zlib.apply_downstream("zlib", &consumer);

        assert_eq!(zlib.value("shared"), Some("True"));
        assert_eq!(
            zlib.dependency_options("bzip2")
                .and_then(|o| o.get("fPIC"))
                .map(String::as_str),
            Some("False")
        );
    }

    #[test]
    fn test_requirement_replacement() {
        let recipe = Recipe::consumer()
            .with_requirement(Requirement::parse("zlib/1.2.11").unwrap())
            .with_requirement(Requirement::parse("zlib/1.3").unwrap())
            .with_requirement(Requirement::parse("zlib/1.2.13").unwrap().with_build());

        assert_eq!(recipe.requirements.len(), 2);
        assert_eq!(recipe.requirements[0].reference().version_str(), "1.3");
        assert!(recipe.requirements[1].build);
    }
}
