// src/cache/layout.rs

//! Cache layouts and the revision abstraction shared by recipes and packages

use crate::db::models::CacheKey;
use crate::error::{Error, Result};
use crate::reference::{PackageReference, RecipeReference};
use std::fmt;
use std::path::{Path, PathBuf};

/// Prefix of placeholder revisions given to temporary layouts
pub const TEMP_REVISION_PREFIX: &str = "tmp";

/// Generate a fresh placeholder revision
pub fn temp_revision() -> String {
    format!("{}{}", TEMP_REVISION_PREFIX, uuid::Uuid::new_v4().simple())
}

/// Whether `revision` is a placeholder produced by [`temp_revision`]
pub fn is_temp_revision(revision: &str) -> bool {
    revision.len() == TEMP_REVISION_PREFIX.len() + 32 && revision.starts_with(TEMP_REVISION_PREFIX)
}

/// A reference whose content can live in the cache under a revision
///
/// Implemented by [`RecipeReference`] (recipe revision) and
/// [`PackageReference`] (package revision) so the cache operations are
/// written once.
pub trait Revisioned: Clone + fmt::Display {
    /// Folder view handed back to callers
    type Layout;

    /// Whether `create_layout` keeps an existing folder's contents
    const PRESERVE_CONTENTS: bool;

    /// Index key for this exact reference
    fn cache_key(&self) -> CacheKey;

    /// The revision this reference is stored under, if any
    fn own_revision(&self) -> Option<&str>;

    /// `name/version[@user/channel]` used to pick the advisory lock
    fn lock_coordinates(&self) -> String;

    /// Copy of this reference carrying a fresh placeholder revision
    fn with_temp_revision(&self) -> Result<Self>;

    /// Bind this reference to its folder
    fn into_layout(self, base: PathBuf) -> Self::Layout;

    /// A real content revision, as opposed to none or a placeholder
    fn has_final_revision(&self) -> bool {
        self.own_revision().is_some_and(|r| !is_temp_revision(r))
    }

    /// Full canonical string
    fn full_reference(&self) -> String {
        self.cache_key().full_reference()
    }
}

impl Revisioned for RecipeReference {
    type Layout = RecipeLayout;

    const PRESERVE_CONTENTS: bool = false;

    fn cache_key(&self) -> CacheKey {
        CacheKey::recipe(self.clone())
    }

    fn own_revision(&self) -> Option<&str> {
        self.revision()
    }

    fn lock_coordinates(&self) -> String {
        self.to_string()
    }

    fn with_temp_revision(&self) -> Result<Self> {
        self.with_revision(&temp_revision())
    }

    fn into_layout(self, base: PathBuf) -> RecipeLayout {
        RecipeLayout {
            reference: self,
            base,
        }
    }
}

impl Revisioned for PackageReference {
    type Layout = PackageLayout;

    const PRESERVE_CONTENTS: bool = true;

    fn cache_key(&self) -> CacheKey {
        CacheKey::package(self)
    }

    fn own_revision(&self) -> Option<&str> {
        self.revision()
    }

    fn lock_coordinates(&self) -> String {
        self.recipe().to_string()
    }

    fn with_temp_revision(&self) -> Result<Self> {
        if self.recipe().revision().is_none() {
            return Err(Error::InvalidReference(format!(
                "Recipe revision must be known to create a package layout for '{}'",
                self
            )));
        }
        self.with_revision(&temp_revision())
    }

    fn into_layout(self, base: PathBuf) -> PackageLayout {
        PackageLayout {
            reference: self,
            base,
        }
    }
}

/// Folders of one recipe revision
#[derive(Debug, Clone)]
pub struct RecipeLayout {
    reference: RecipeReference,
    base: PathBuf,
}

impl RecipeLayout {
    pub fn reference(&self) -> &RecipeReference {
        &self.reference
    }

    pub fn base_folder(&self) -> &Path {
        &self.base
    }

    /// Exported recipe files
    pub fn export(&self) -> PathBuf {
        self.base.join("export")
    }

    pub fn export_sources(&self) -> PathBuf {
        self.base.join("export_sources")
    }

    /// Unpacked sources shared by every build of this revision
    pub fn source(&self) -> PathBuf {
        self.base.join("source")
    }

    pub fn download(&self) -> PathBuf {
        self.base.join("download")
    }
}

/// Folders of one package revision
#[derive(Debug, Clone)]
pub struct PackageLayout {
    reference: PackageReference,
    base: PathBuf,
}

impl PackageLayout {
    pub fn reference(&self) -> &PackageReference {
        &self.reference
    }

    pub fn base_folder(&self) -> &Path {
        &self.base
    }

    /// Final binary contents
    pub fn package(&self) -> PathBuf {
        self.base.join("package")
    }

    pub fn build(&self) -> PathBuf {
        self.base.join("build")
    }

    pub fn download(&self) -> PathBuf {
        self.base.join("download")
    }
}
