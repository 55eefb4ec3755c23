// src/reference/version.rs

//! Package versions and version range expressions
//!
//! Versions are kept as the text the recipe author wrote. Comparisons go
//! through `semver` after padding short versions (`1.2` becomes `1.2.0`), so
//! versions that cannot be expressed as semver never satisfy a range.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// A package version as written in a reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(String);

impl Version {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this "version" is actually a range expression like `[>=1.0 <2.0]`
    pub fn is_range(&self) -> bool {
        self.0.starts_with('[') && self.0.ends_with(']')
    }

    /// Semver view of this version, padding missing minor/patch components
    pub fn to_semver(&self) -> Option<semver::Version> {
        if let Ok(version) = semver::Version::parse(&self.0) {
            return Some(version);
        }

        let split = self.0.find(['-', '+']).unwrap_or(self.0.len());
        let (core, rest) = self.0.split_at(split);
        let parts = core.split('.').count();
        if core.is_empty() || parts > 3 {
            return None;
        }

        let padded = format!("{}{}{}", core, ".0".repeat(3 - parts), rest);
        semver::Version::parse(&padded).ok()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A version constraint such as `>=1.2,<2.0` or `[~1.2 || 2.0]`
///
/// Alternatives separated by `||` are OR-ed; comparators inside one
/// alternative are AND-ed. A bare version means exact equality.
#[derive(Debug, Clone)]
pub struct VersionRange {
    expression: String,
    alternatives: Vec<semver::VersionReq>,
    include_prerelease: bool,
}

impl VersionRange {
    /// Parse a range, with or without the surrounding brackets
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        let inner = trimmed
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(trimmed);

        let mut alternatives = Vec::new();
        let mut include_prerelease = false;

        for alternative in inner.split("||") {
            let mut comparators: Vec<String> = Vec::new();
            let mut pending_op: Option<&str> = None;

            for token in alternative
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|t| !t.is_empty())
            {
                if let Some((key, value)) = token.split_once('=') {
                    if key.chars().all(|c| c.is_ascii_alphabetic() || c == '_') && !key.is_empty()
                    {
                        if key == "include_prerelease" {
                            include_prerelease = value.eq_ignore_ascii_case("true");
                        }
                        continue;
                    }
                }

                if token.chars().all(|c| "<>=~^".contains(c)) {
                    pending_op = Some(token);
                    continue;
                }

                let comparator = match pending_op.take() {
                    Some(op) => format!("{}{}", op, token),
                    None if token.starts_with(['<', '>', '=', '~', '^', '*']) => token.to_string(),
                    None => format!("={}", token),
                };
                comparators.push(comparator);
            }

            if pending_op.is_some() {
                return Err(Error::InvalidVersionRange(expression.to_string()));
            }
            if comparators.is_empty() {
                comparators.push("*".to_string());
            }

            let req = semver::VersionReq::parse(&comparators.join(", "))
                .map_err(|_| Error::InvalidVersionRange(expression.to_string()))?;
            alternatives.push(req);
        }

        Ok(Self {
            expression: inner.trim().to_string(),
            alternatives,
            include_prerelease,
        })
    }

    /// The range text without brackets
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Check whether a concrete version lies inside this range
    pub fn satisfies(&self, version: &Version) -> bool {
        let Some(mut candidate) = version.to_semver() else {
            return false;
        };

        if self.alternatives.iter().any(|req| req.matches(&candidate)) {
            return true;
        }

        if self.include_prerelease && !candidate.pre.is_empty() {
            candidate.pre = semver::Prerelease::EMPTY;
            return self.alternatives.iter().any(|req| req.matches(&candidate));
        }

        false
    }
}

impl FromStr for VersionRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.expression)
    }
}
