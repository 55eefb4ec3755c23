// src/graph/requirement.rs

//! Requirements declared by recipes

use crate::error::Result;
use crate::reference::{RecipeReference, VersionRange};
use std::fmt;

/// One dependency declared by a recipe
///
/// The target is either a fixed reference (`zlib/1.2.11`) or a version range
/// (`zlib/[>=1.2 <2.0]`). Once resolved, the requirement is rewritten to point
/// at the concrete reference it was satisfied with.
#[derive(Debug, Clone)]
pub struct Requirement {
    reference: RecipeReference,
    range: Option<VersionRange>,
    /// Needed to build the consumer; resolved in the build context
    pub build: bool,
    /// Not visible to the consumer's own consumers
    pub private: bool,
    /// Overrides any other version of this package further up the graph
    pub force: bool,
    /// Only needed to test the consumer
    pub test: bool,
}

impl Requirement {
    pub fn new(reference: RecipeReference) -> Result<Self> {
        let range = if reference.version().is_range() {
            Some(VersionRange::parse(reference.version_str())?)
        } else {
            None
        };

        Ok(Self {
            reference,
            range,
            build: false,
            private: false,
            force: false,
            test: false,
        })
    }

    /// Parse `name/version[@user/channel][#rev]` or `name/[range]`
    pub fn parse(text: &str) -> Result<Self> {
        Self::new(RecipeReference::parse(text)?)
    }

    pub fn with_build(mut self) -> Self {
        self.build = true;
        self
    }

    pub fn with_private(mut self) -> Self {
        self.private = true;
        self
    }

    pub fn with_override(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_test(mut self) -> Self {
        self.test = true;
        self
    }

    pub fn name(&self) -> &str {
        self.reference.name()
    }

    pub fn reference(&self) -> &RecipeReference {
        &self.reference
    }

    pub fn range(&self) -> Option<&VersionRange> {
        self.range.as_ref()
    }

    /// Whether this requirement stops at the consumer instead of reaching
    /// the consumer's own dependants
    pub fn is_visible_downstream(&self) -> bool {
        !(self.build || self.private || self.test)
    }

    /// Copy of this requirement pinned to a concrete reference
    pub fn resolve_to(&self, reference: RecipeReference) -> Self {
        Self {
            reference,
            range: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference.full_repr())
    }
}
