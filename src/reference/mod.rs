// src/reference/mod.rs

//! Package coordinates
//!
//! A recipe reference names a package recipe:
//! `name/version[@user/channel][#recipe_revision]`. A package reference names
//! one binary built from that recipe: `recipe_ref:package_id[#package_revision]`.
//!
//! Name, version, user and channel never change after construction. The
//! revision starts unknown and is attached once the content is hashed, which
//! produces a new value rather than mutating the existing one.

mod version;

pub use version::{Version, VersionRange};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Placeholder used for missing user/channel in directory form
pub const DEFAULT_USER_CHANNEL: &str = "_";

const NAME_MIN_CHARS: usize = 2;
const NAME_MAX_CHARS: usize = 51;
const REVISION_MAX_CHARS: usize = 51;

/// Reference to a package recipe
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecipeReference {
    name: String,
    version: String,
    user: Option<String>,
    channel: Option<String>,
    revision: Option<String>,
}

impl RecipeReference {
    /// Create a validated reference without revision
    pub fn new(name: &str, version: &str) -> Result<Self> {
        Self::from_parts(name, version, None, None, None)
    }

    /// Create a validated reference from every field
    pub fn from_parts(
        name: &str,
        version: &str,
        user: Option<&str>,
        channel: Option<&str>,
        revision: Option<&str>,
    ) -> Result<Self> {
        let normalize = |field: Option<&str>| {
            field
                .filter(|v| !v.is_empty() && *v != DEFAULT_USER_CHANNEL)
                .map(str::to_string)
        };

        let reference = Self {
            name: name.to_string(),
            version: version.to_string(),
            user: normalize(user),
            channel: normalize(channel),
            revision: revision.filter(|r| !r.is_empty()).map(str::to_string),
        };

        if reference.user.is_some() != reference.channel.is_some() {
            return Err(Error::InvalidReference(format!(
                "'{}' must specify both user and channel or neither",
                reference
            )));
        }

        reference.validate()?;
        Ok(reference)
    }

    /// Parse `name/version[@user/channel][#revision]`
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (body, revision) = match text.split_once('#') {
            Some((body, revision)) => (body, Some(revision)),
            None => (text, None),
        };

        let (name_version, user_channel) = match body.split_once('@') {
            Some((nv, uc)) => (nv, Some(uc)),
            None => (body, None),
        };

        let (name, version) = name_version.split_once('/').ok_or_else(|| {
            Error::InvalidReference(format!(
                "'{}' should look like name/version[@user/channel]",
                text
            ))
        })?;

        let (user, channel) = match user_channel {
            Some(uc) if !uc.is_empty() => {
                let (user, channel) = uc.split_once('/').ok_or_else(|| {
                    Error::InvalidReference(format!("'{}' has an incomplete user/channel", text))
                })?;
                (Some(user), Some(channel))
            }
            _ => (None, None),
        };

        if channel.is_some_and(|c| c.contains('/')) || version.contains('/') {
            return Err(Error::InvalidReference(format!(
                "'{}' has too many '/' separators",
                text
            )));
        }

        Self::from_parts(name, version, user, channel, revision)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Version {
        Version::new(self.version.as_str())
    }

    pub fn version_str(&self) -> &str {
        &self.version
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// Copy of this reference carrying `revision`
    pub fn with_revision(&self, revision: &str) -> Result<Self> {
        validate_revision(revision)?;
        Ok(Self {
            revision: Some(revision.to_string()),
            ..self.clone()
        })
    }

    /// Copy of this reference with the revision cleared
    pub fn without_revision(&self) -> Self {
        Self {
            revision: None,
            ..self.clone()
        }
    }

    /// Copy of this reference pointing at another concrete version
    pub fn with_version(&self, version: &str) -> Result<Self> {
        Self::from_parts(
            &self.name,
            version,
            self.user(),
            self.channel(),
            None,
        )
    }

    /// `name/version@user/channel#revision`, the form stored in the cache index
    pub fn full_repr(&self) -> String {
        match &self.revision {
            Some(revision) => format!("{}#{}", self, revision),
            None => self.to_string(),
        }
    }

    /// `name/version/user/channel` with `_` for missing user/channel
    pub fn dir_repr(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.name,
            self.version,
            self.user().unwrap_or(DEFAULT_USER_CHANNEL),
            self.channel().unwrap_or(DEFAULT_USER_CHANNEL)
        )
    }

    fn validate(&self) -> Result<()> {
        validate_name(&self.name, "package name")?;
        if !Version::new(self.version.as_str()).is_range() {
            validate_version(&self.version)?;
        }
        if let Some(user) = &self.user {
            validate_name(user, "user name")?;
        }
        if let Some(channel) = &self.channel {
            validate_name(channel, "channel")?;
        }
        if let Some(revision) = &self.revision {
            validate_revision(revision)?;
        }
        Ok(())
    }
}

impl fmt::Display for RecipeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)?;
        if let (Some(user), Some(channel)) = (&self.user, &self.channel) {
            write!(f, "@{}/{}", user, channel)?;
        }
        Ok(())
    }
}

impl FromStr for RecipeReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Reference to one binary package of a recipe
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageReference {
    recipe: RecipeReference,
    package_id: String,
    revision: Option<String>,
}

impl PackageReference {
    pub fn new(recipe: RecipeReference, package_id: &str) -> Result<Self> {
        Self::with_parts(recipe, package_id, None)
    }

    pub fn with_parts(
        recipe: RecipeReference,
        package_id: &str,
        revision: Option<&str>,
    ) -> Result<Self> {
        if package_id.is_empty() || !package_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidReference(format!(
                "package id '{}' must be a non-empty alphanumeric hash",
                package_id
            )));
        }
        let revision = revision.filter(|r| !r.is_empty());
        if let Some(revision) = revision {
            validate_revision(revision)?;
        }

        Ok(Self {
            recipe,
            package_id: package_id.to_string(),
            revision: revision.map(str::to_string),
        })
    }

    /// Parse `recipe_ref[#rrev]:package_id[#prev]`
    pub fn parse(text: &str) -> Result<Self> {
        let (recipe, package) = text.trim().split_once(':').ok_or_else(|| {
            Error::InvalidReference(format!("Wrong package reference '{}'", text))
        })?;
        let recipe = RecipeReference::parse(recipe)?;
        let (package_id, revision) = match package.trim().split_once('#') {
            Some((id, revision)) => (id, Some(revision)),
            None => (package.trim(), None),
        };
        Self::with_parts(recipe, package_id, revision)
    }

    pub fn recipe(&self) -> &RecipeReference {
        &self.recipe
    }

    pub fn package_id(&self) -> &str {
        &self.package_id
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// Copy of this reference carrying package revision `revision`
    pub fn with_revision(&self, revision: &str) -> Result<Self> {
        validate_revision(revision)?;
        Ok(Self {
            revision: Some(revision.to_string()),
            ..self.clone()
        })
    }

    pub fn without_revision(&self) -> Self {
        Self {
            revision: None,
            ..self.clone()
        }
    }

    pub fn full_repr(&self) -> String {
        let mut repr = format!("{}:{}", self.recipe.full_repr(), self.package_id);
        if let Some(revision) = &self.revision {
            repr.push('#');
            repr.push_str(revision);
        }
        repr
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.recipe, self.package_id)
    }
}

impl FromStr for PackageReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '.' | '-')
}

fn invalid_name(value: &str, token: &str, reason: &str) -> Error {
    Error::InvalidReference(format!(
        "Value provided for {}, '{}', {}",
        token, value, reason
    ))
}

fn validate_name(value: &str, token: &str) -> Result<()> {
    let len = value.chars().count();
    if len > NAME_MAX_CHARS {
        return Err(invalid_name(
            value,
            token,
            &format!("is too long. Valid names must contain at most {} characters.", NAME_MAX_CHARS),
        ));
    }
    if len < NAME_MIN_CHARS {
        return Err(invalid_name(
            value,
            token,
            &format!("is too short. Valid names must contain at least {} characters.", NAME_MIN_CHARS),
        ));
    }
    validate_chars(value, token)
}

fn validate_version(value: &str) -> Result<()> {
    if value.is_empty() || value.chars().count() > NAME_MAX_CHARS {
        return Err(invalid_name(
            value,
            "package version",
            &format!("must have between 1 and {} characters", NAME_MAX_CHARS),
        ));
    }
    validate_chars(value, "package version")
}

fn validate_chars(value: &str, token: &str) -> Result<()> {
    let mut chars = value.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
    if !first_ok || !chars.all(is_name_char) {
        return Err(invalid_name(
            value,
            token,
            "is an invalid name. Valid names MUST begin with a letter, number or underscore \
             and contain only letters, numbers, underscore, plus, dot and dash",
        ));
    }
    Ok(())
}

fn validate_revision(revision: &str) -> Result<()> {
    let len = revision.chars().count();
    if len == 0 || len > REVISION_MAX_CHARS || !revision.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(Error::InvalidReference(format!(
            "The revision field '{}' must contain only letters and numbers with a length between 1 and {}",
            revision, REVISION_MAX_CHARS
        )));
    }
    Ok(())
}
