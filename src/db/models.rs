// src/db/models.rs

//! Data models for cache index entities
//!
//! This module defines the reference row stored for every cached recipe
//! revision and package revision, with methods for creating, reading,
//! updating, and deleting records.

use crate::error::{Error, Result};
use crate::reference::{PackageReference, RecipeReference};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::Serialize;

const ROW_COLUMNS: &str =
    "id, name, version, user, channel, rrev, pkgid, prev, path, timestamp, remote, build_id";

/// Identity of an index row: a recipe revision, optionally narrowed to a
/// package id and package revision
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CacheKey {
    pub recipe: RecipeReference,
    pub package_id: Option<String>,
    pub package_revision: Option<String>,
}

impl CacheKey {
    pub fn recipe(recipe: RecipeReference) -> Self {
        Self {
            recipe,
            package_id: None,
            package_revision: None,
        }
    }

    pub fn package(pref: &PackageReference) -> Self {
        Self {
            recipe: pref.recipe().clone(),
            package_id: Some(pref.package_id().to_string()),
            package_revision: pref.revision().map(str::to_string),
        }
    }

    /// Full canonical string, unique per row
    pub fn full_reference(&self) -> String {
        let mut repr = self.recipe.full_repr();
        if let Some(package_id) = &self.package_id {
            repr.push(':');
            repr.push_str(package_id);
        }
        if let Some(prev) = &self.package_revision {
            repr.push('#');
            repr.push_str(prev);
        }
        repr
    }

    /// `name/version[@user/channel]`, shared by every revision of a recipe
    pub fn recipe_coordinates(&self) -> String {
        self.recipe.to_string()
    }
}

/// A reference row in the cache index
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceRow {
    pub id: Option<i64>,
    pub key: CacheKey,
    pub path: String,
    pub timestamp: f64,
    pub remote: Option<String>,
    pub build_id: Option<String>,
}

/// Optional column changes for [`ReferenceRow::update`]
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct RowUpdate {
    pub key: Option<CacheKey>,
    pub path: Option<String>,
    pub timestamp: Option<f64>,
    pub remote: Option<String>,
    pub build_id: Option<String>,
}

/// Which rows a listing query returns
#[derive(Debug, Clone, Default)]
pub struct RowFilter {
    /// Restrict to one `name/version[@user/channel]`
    pub recipe: Option<String>,
    /// Restrict to one recipe revision
    pub rrev: Option<String>,
    /// `false` selects recipe rows, `true` selects package rows
    pub packages: bool,
    /// Restrict package rows to one package id
    pub pkgid: Option<String>,
    /// Restrict package rows to one package revision
    pub prev: Option<String>,
    /// Include rows with timestamp 0 (temporary layouts)
    pub include_temporary: bool,
}

impl ReferenceRow {
    /// Create a new row for `key` stored at `path`
    pub fn new(key: CacheKey, path: String, timestamp: f64) -> Self {
        Self {
            id: None,
            key,
            path,
            timestamp,
            remote: None,
            build_id: None,
        }
    }

    /// Whether this row belongs to a layout that has not been promoted yet
    pub fn is_temporary(&self) -> bool {
        self.timestamp == 0.0
    }

    /// Insert this row into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        let recipe = &self.key.recipe;
        let rrev = recipe.revision().ok_or_else(|| {
            Error::InvalidReference(format!("'{}' has no recipe revision", recipe))
        })?;

        conn.execute(
            "INSERT INTO refs (reference, recipe, name, version, user, channel, rrev, pkgid, prev,
                               path, timestamp, remote, build_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                self.key.full_reference(),
                self.key.recipe_coordinates(),
                recipe.name(),
                recipe.version_str(),
                recipe.user(),
                recipe.channel(),
                rrev,
                &self.key.package_id,
                &self.key.package_revision,
                &self.path,
                self.timestamp,
                &self.remote,
                &self.build_id,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find the row for an exact key
    pub fn find(conn: &Connection, key: &CacheKey) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM refs WHERE reference = ?1",
            ROW_COLUMNS
        ))?;

        let row = stmt
            .query_row([key.full_reference()], Self::from_row)
            .optional()?;

        Ok(row)
    }

    /// Find the row for an exact key or fail with `NotFound`
    pub fn get(conn: &Connection, key: &CacheKey) -> Result<Self> {
        Self::find(conn, key)?.ok_or_else(|| Error::NotFound(key.full_reference()))
    }

    /// Check if `path` is already used by a row other than `key`
    pub fn path_used_by_other(conn: &Connection, path: &str, key: &CacheKey) -> Result<bool> {
        let found = conn
            .query_row(
                "SELECT 1 FROM refs WHERE path = ?1 AND reference != ?2",
                params![path, key.full_reference()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Apply `changes` to the row identified by `key`
    ///
    /// Fails with `AlreadyExists` when the new reference or path belongs to
    /// another row, and with `NotFound` when no row matches `key`.
    pub fn update(conn: &Connection, key: &CacheKey, changes: &RowUpdate) -> Result<()> {
        let mut assignments: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(new_key) = &changes.key {
            let recipe = &new_key.recipe;
            let rrev = recipe.revision().ok_or_else(|| {
                Error::InvalidReference(format!("'{}' has no recipe revision", recipe))
            })?;
            assignments.extend([
                "reference = ?", "recipe = ?", "name = ?", "version = ?", "user = ?",
                "channel = ?", "rrev = ?", "pkgid = ?", "prev = ?",
            ]);
            values.extend([
                Value::Text(new_key.full_reference()),
                Value::Text(new_key.recipe_coordinates()),
                Value::Text(recipe.name().to_string()),
                Value::Text(recipe.version_str().to_string()),
                optional_text(recipe.user()),
                optional_text(recipe.channel()),
                Value::Text(rrev.to_string()),
                optional_text(new_key.package_id.as_deref()),
                optional_text(new_key.package_revision.as_deref()),
            ]);
        }
        if let Some(path) = &changes.path {
            assignments.push("path = ?");
            values.push(Value::Text(path.clone()));
        }
        if let Some(timestamp) = changes.timestamp {
            assignments.push("timestamp = ?");
            values.push(Value::Real(timestamp));
        }
        if let Some(remote) = &changes.remote {
            assignments.push("remote = ?");
            values.push(Value::Text(remote.clone()));
        }
        if let Some(build_id) = &changes.build_id {
            assignments.push("build_id = ?");
            values.push(Value::Text(build_id.clone()));
        }

        if assignments.is_empty() {
            return Self::get(conn, key).map(|_| ());
        }

        values.push(Value::Text(key.full_reference()));
        let query = format!(
            "UPDATE refs SET {} WHERE reference = ?",
            assignments.join(", ")
        );

        let updated = conn
            .execute(&query, params_from_iter(values))
            .map_err(Error::from)
            .map_err(|e| {
                if crate::db::is_unique_violation(&e) {
                    let target = changes.key.as_ref().unwrap_or(key);
                    Error::AlreadyExists(target.full_reference())
                } else {
                    e
                }
            })?;

        if updated == 0 {
            return Err(Error::NotFound(key.full_reference()));
        }
        Ok(())
    }

    /// Set or clear the remote an entry came from
    pub fn set_remote(conn: &Connection, key: &CacheKey, remote: Option<&str>) -> Result<()> {
        let updated = conn.execute(
            "UPDATE refs SET remote = ?1 WHERE reference = ?2",
            params![remote, key.full_reference()],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(key.full_reference()));
        }
        Ok(())
    }

    /// Delete the row stored at `path`
    pub fn delete_by_path(conn: &Connection, path: &str) -> Result<()> {
        conn.execute("DELETE FROM refs WHERE path = ?1", [path])?;
        Ok(())
    }

    /// Delete the row for `key`
    pub fn delete(conn: &Connection, key: &CacheKey) -> Result<()> {
        conn.execute(
            "DELETE FROM refs WHERE reference = ?1",
            [key.full_reference()],
        )?;
        Ok(())
    }

    /// List rows matching `filter`, newest first
    pub fn list(conn: &Connection, filter: &RowFilter) -> Result<Vec<Self>> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if filter.packages {
            conditions.push("pkgid IS NOT NULL");
        } else {
            conditions.push("pkgid IS NULL");
        }
        if !filter.include_temporary {
            conditions.push("timestamp > 0");
        }
        if let Some(recipe) = &filter.recipe {
            conditions.push("recipe = ?");
            values.push(Value::Text(recipe.clone()));
        }
        if let Some(rrev) = &filter.rrev {
            conditions.push("rrev = ?");
            values.push(Value::Text(rrev.clone()));
        }
        if let Some(pkgid) = &filter.pkgid {
            conditions.push("pkgid = ?");
            values.push(Value::Text(pkgid.clone()));
        }
        if let Some(prev) = &filter.prev {
            conditions.push("prev = ?");
            values.push(Value::Text(prev.clone()));
        }

        let query = format!(
            "SELECT {} FROM refs WHERE {} ORDER BY timestamp DESC, id DESC",
            ROW_COLUMNS,
            conditions.join(" AND ")
        );

        let mut stmt = conn.prepare(&query)?;
        let rows = stmt
            .query_map(params_from_iter(values), Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// List every row, temporary ones included, ordered by path
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM refs ORDER BY path",
            ROW_COLUMNS
        ))?;

        let rows = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Count rows, temporary ones included
    pub fn count(conn: &Connection) -> Result<i64> {
        let count = conn.query_row("SELECT COUNT(*) FROM refs", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Typed recipe reference of this row (carries the recipe revision)
    pub fn recipe_reference(&self) -> RecipeReference {
        self.key.recipe.clone()
    }

    /// Typed package reference of this row, if it is a package row
    pub fn package_reference(&self) -> Option<PackageReference> {
        let package_id = self.key.package_id.as_deref()?;
        PackageReference::with_parts(
            self.key.recipe.clone(),
            package_id,
            self.key.package_revision.as_deref(),
        )
        .ok()
    }

    /// Convert a database row to a ReferenceRow
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let name: String = row.get(1)?;
        let version: String = row.get(2)?;
        let user: Option<String> = row.get(3)?;
        let channel: Option<String> = row.get(4)?;
        let rrev: String = row.get(5)?;

        let recipe = RecipeReference::from_parts(
            &name,
            &version,
            user.as_deref(),
            channel.as_deref(),
            Some(&rrev),
        )
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    e.to_string(),
                )),
            )
        })?;

        Ok(Self {
            id: Some(row.get(0)?),
            key: CacheKey {
                recipe,
                package_id: row.get(6)?,
                package_revision: row.get(7)?,
            },
            path: row.get(8)?,
            timestamp: row.get(9)?,
            remote: row.get(10)?,
            build_id: row.get(11)?,
        })
    }
}

fn optional_text(value: Option<&str>) -> Value {
    match value {
        Some(v) => Value::Text(v.to_string()),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        schema::migrate(&conn).unwrap();
        (temp_file, conn)
    }

    fn recipe_key(text: &str) -> CacheKey {
        CacheKey::recipe(RecipeReference::parse(text).unwrap())
    }

    #[test]
    fn test_reference_row_crud() {
        let (_temp, conn) = create_test_db();

        let key = recipe_key("zlib/1.2.11#rev1");
        let mut row = ReferenceRow::new(key.clone(), "a1b2c3".to_string(), 100.0);
        let id = row.insert(&conn).unwrap();
        assert!(id > 0);

        let found = ReferenceRow::find(&conn, &key).unwrap().unwrap();
        assert_eq!(found.path, "a1b2c3");
        assert_eq!(found.key, key);
        assert_eq!(found.timestamp, 100.0);

        ReferenceRow::set_remote(&conn, &key, Some("central")).unwrap();
        let found = ReferenceRow::get(&conn, &key).unwrap();
        assert_eq!(found.remote, Some("central".to_string()));

        ReferenceRow::delete(&conn, &key).unwrap();
        assert!(ReferenceRow::find(&conn, &key).unwrap().is_none());
    }

    #[test]
    fn test_insert_without_revision_fails() {
        let (_temp, conn) = create_test_db();

        let mut row = ReferenceRow::new(recipe_key("zlib/1.2.11"), "a1b2c3".to_string(), 1.0);
        assert!(matches!(
            row.insert(&conn),
            Err(Error::InvalidReference(_))
        ));
    }

    #[test]
    fn test_path_used_by_other() {
        let (_temp, conn) = create_test_db();

        let key = recipe_key("zlib/1.2.11#rev1");
        ReferenceRow::new(key.clone(), "a1b2c3".to_string(), 1.0)
            .insert(&conn)
            .unwrap();

        assert!(!ReferenceRow::path_used_by_other(&conn, "a1b2c3", &key).unwrap());
        assert!(
            ReferenceRow::path_used_by_other(&conn, "a1b2c3", &recipe_key("zlib/1.2.11#rev2"))
                .unwrap()
        );
        assert!(!ReferenceRow::path_used_by_other(&conn, "ffffff", &key).unwrap());
    }

    #[test]
    fn test_update_renames_reference() {
        let (_temp, conn) = create_test_db();

        let old = recipe_key("zlib/1.2.11#tmp1");
        ReferenceRow::new(old.clone(), "t/aaaaaa".to_string(), 0.0)
            .insert(&conn)
            .unwrap();

        let new = recipe_key("zlib/1.2.11#rev1");
        let changes = RowUpdate {
            key: Some(new.clone()),
            path: Some("bbbbbb".to_string()),
            timestamp: Some(5.0),
            ..Default::default()
        };
        ReferenceRow::update(&conn, &old, &changes).unwrap();

        assert!(ReferenceRow::find(&conn, &old).unwrap().is_none());
        let row = ReferenceRow::get(&conn, &new).unwrap();
        assert_eq!(row.path, "bbbbbb");
        assert!(!row.is_temporary());
    }

    #[test]
    fn test_update_onto_existing_reference_fails() {
        let (_temp, conn) = create_test_db();

        let existing = recipe_key("zlib/1.2.11#rev1");
        ReferenceRow::new(existing.clone(), "bbbbbb".to_string(), 5.0)
            .insert(&conn)
            .unwrap();
        let temp = recipe_key("zlib/1.2.11#tmp1");
        ReferenceRow::new(temp.clone(), "t/aaaaaa".to_string(), 0.0)
            .insert(&conn)
            .unwrap();

        let changes = RowUpdate {
            key: Some(existing.clone()),
            ..Default::default()
        };
        let result = ReferenceRow::update(&conn, &temp, &changes);
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_update_missing_row() {
        let (_temp, conn) = create_test_db();

        let changes = RowUpdate {
            timestamp: Some(1.0),
            ..Default::default()
        };
        let result = ReferenceRow::update(&conn, &recipe_key("zlib/1.2.11#rev1"), &changes);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_list_filters_temporary_and_packages() {
        let (_temp, conn) = create_test_db();

        ReferenceRow::new(recipe_key("zlib/1.2.11#rev1"), "aaaaaa".to_string(), 1.0)
            .insert(&conn)
            .unwrap();
        ReferenceRow::new(recipe_key("zlib/1.2.11#tmp9"), "t/bbbbbb".to_string(), 0.0)
            .insert(&conn)
            .unwrap();
        let pref = PackageReference::parse("zlib/1.2.11#rev1:abc123#p1").unwrap();
        ReferenceRow::new(CacheKey::package(&pref), "cccccc".to_string(), 2.0)
            .insert(&conn)
            .unwrap();

        let recipes = ReferenceRow::list(&conn, &RowFilter::default()).unwrap();
        assert_eq!(recipes.len(), 1);
        assert_eq!(recipes[0].key.recipe.revision(), Some("rev1"));

        let packages = ReferenceRow::list(
            &conn,
            &RowFilter {
                packages: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].package_reference(), Some(pref));

        assert_eq!(ReferenceRow::count(&conn).unwrap(), 3);
    }
}
