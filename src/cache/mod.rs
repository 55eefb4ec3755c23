// src/cache/mod.rs

//! Revisioned content-addressed cache
//!
//! Every recipe revision and package revision owns one folder under the
//! cache root and one row in the cache index:
//! - Temporary folders live under `t/` and are named from a random hash
//! - Permanent folders are named from the hash of the full reference
//! - Folder names are the shortest hash prefix (at least
//!   [`HASH_MIN_SIZE`](config::HASH_MIN_SIZE) characters) no other row uses
//!
//! The index is the source of truth. Writes for one recipe are serialized
//! across processes by an advisory lock, and the UNIQUE constraint on the
//! path column settles races between different recipes.

pub mod config;
pub mod layout;
pub mod lock;

pub use config::CacheConfig;
pub use layout::{PackageLayout, RecipeLayout, Revisioned};

use crate::db::{
    self,
    models::{CacheKey, ReferenceRow, RowFilter, RowUpdate},
};
use crate::error::{Error, Result};
use crate::reference::{PackageReference, RecipeReference};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Namespace for folders of unpromoted layouts
const TEMP_NAMESPACE: &str = "t";

/// Changes accepted by [`Cache::update_reference`]
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ReferenceUpdate {
    pub remote: Option<String>,
    pub build_id: Option<String>,
    pub timestamp: Option<f64>,
}

/// Local cache of recipes and packages shared by cooperating processes
pub struct Cache {
    config: CacheConfig,
    root: PathBuf,
    conn: Connection,
}

impl Cache {
    /// Open the cache described by `config`, creating root and index if needed
    pub fn open(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.root).map_err(|e| {
            Error::InitError(format!(
                "Failed to create cache root {}: {}",
                config.root.display(),
                e
            ))
        })?;
        let root = fs::canonicalize(&config.root)?;
        let conn = db::init(&root.join(&config.db_filename), config.busy_timeout())?;

        info!("Opened cache at {}", root.display());
        Ok(Self { config, root, conn })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Absolute cache root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a layout for content whose revision is not known yet
    ///
    /// The returned layout's reference carries a placeholder revision; pass it
    /// to [`promote_revision`](Self::promote_revision) once the real revision
    /// has been computed.
    pub fn create_temp_layout<R: Revisioned>(&self, reference: &R) -> Result<R::Layout> {
        if reference.own_revision().is_some() {
            return Err(Error::InvalidReference(format!(
                "'{}' already has a revision, temporary layouts are for unrevisioned content",
                reference.full_reference()
            )));
        }

        let temp = reference.with_temp_revision()?;
        let key = temp.cache_key();
        let _lock = self.lock(&temp)?;

        let digest = sha256_hex(&uuid::Uuid::new_v4().to_string());
        let row = self.allocate(&key, &digest, Some(TEMP_NAMESPACE), 0.0)?;
        self.create_folder(&row, true)?;

        debug!("Created temporary layout {} for {}", row.path, key.full_reference());
        Ok(temp.into_layout(self.full_path(&row.path)))
    }

    /// Create the permanent layout for a reference with a final revision
    ///
    /// Recipe folders start empty; package folders keep whatever a previous
    /// layout left there.
    pub fn create_layout<R: Revisioned>(&self, reference: &R) -> Result<R::Layout> {
        self.require_final_revision(reference)?;

        let key = reference.cache_key();
        let _lock = self.lock(reference)?;

        let digest = sha256_hex(&key.full_reference());
        let row = self.allocate(&key, &digest, None, now())?;
        self.create_folder(&row, !R::PRESERVE_CONTENTS)?;

        info!("Created layout {} for {}", row.path, key.full_reference());
        Ok(reference.clone().into_layout(self.full_path(&row.path)))
    }

    /// Look up the layout of an exact reference
    pub fn get_layout<R: Revisioned>(&self, reference: &R) -> Result<R::Layout> {
        let key = reference.cache_key();
        let row = ReferenceRow::get(&self.conn, &key)?;
        let path = self.full_path(&row.path);

        if !path.is_dir() {
            return Err(Error::CacheCorruption {
                reference: key.full_reference(),
                path,
            });
        }

        Ok(reference.clone().into_layout(path))
    }

    pub fn get_or_create_layout<R: Revisioned>(&self, reference: &R) -> Result<R::Layout> {
        match self.get_layout(reference) {
            Err(Error::NotFound(_)) => self.create_layout(reference),
            other => other,
        }
    }

    /// Move content stored under `old` (usually a placeholder revision) to
    /// the permanent location of `new`
    ///
    /// When `new` is already cached the index keeps its existing row with a
    /// refreshed timestamp, the row of `old` is dropped, and the folder
    /// contents are replaced by those of `old`.
    pub fn promote_revision<R: Revisioned>(&self, old: &R, new: &R) -> Result<R::Layout> {
        self.require_final_revision(new)?;
        if old.lock_coordinates() != new.lock_coordinates() {
            return Err(Error::InvalidReference(format!(
                "Cannot promote '{}' to unrelated reference '{}'",
                old.full_reference(),
                new.full_reference()
            )));
        }

        let old_key = old.cache_key();
        let new_key = new.cache_key();
        let _lock = self.lock(new)?;

        let old_row = ReferenceRow::get(&self.conn, &old_key)?;
        let old_path = self.full_path(&old_row.path);
        if !old_path.is_dir() {
            return Err(Error::CacheCorruption {
                reference: old_key.full_reference(),
                path: old_path,
            });
        }

        let digest = sha256_hex(&new_key.full_reference());
        let mut min_len = self.config.hash_min_size;

        // The destination is cleared before the index changes, and the folder
        // moves inside the index transaction: a failed move rolls the rows back
        let new_rel = loop {
            let (candidate, len) = self.calculate_path(&new_key, &digest, None, min_len)?;
            let new_path = self.full_path(&candidate);
            clear_folder(&new_path)?;

            let changes = RowUpdate {
                key: Some(new_key.clone()),
                path: Some(candidate.clone()),
                timestamp: Some(now()),
                ..Default::default()
            };
            let moved = db::transaction(&self.conn, |tx| {
                ReferenceRow::update(tx, &old_key, &changes)?;
                move_folder(&old_path, &new_path)
            });

            match moved {
                Ok(()) => break candidate,
                Err(Error::AlreadyExists(_)) => {
                    if ReferenceRow::find(&self.conn, &new_key)?.is_some() {
                        info!(
                            "{} is already cached, refreshing it and dropping {}",
                            new_key.full_reference(),
                            old_row.path
                        );
                        let refresh = RowUpdate {
                            path: Some(candidate.clone()),
                            timestamp: Some(now()),
                            ..Default::default()
                        };
                        db::transaction(&self.conn, |tx| {
                            ReferenceRow::delete_by_path(tx, &old_row.path)?;
                            ReferenceRow::update(tx, &new_key, &refresh)?;
                            move_folder(&old_path, &new_path)
                        })?;
                        break candidate;
                    }

                    warn!(
                        "Path {} was taken by another process, retrying with a longer prefix",
                        candidate
                    );
                    min_len = len + 1;
                }
                Err(e) => return Err(e),
            }
        };

        let new_path = self.full_path(&new_rel);
        info!(
            "Promoted {} to {} at {}",
            old_key.full_reference(),
            new_key.full_reference(),
            new_rel
        );
        Ok(new.clone().into_layout(new_path))
    }

    /// Assign the computed recipe revision to a temporary recipe layout
    pub fn assign_rrev(&self, layout: &RecipeLayout, rrev: &str) -> Result<RecipeLayout> {
        let new = layout.reference().with_revision(rrev)?;
        self.promote_revision(layout.reference(), &new)
    }

    /// Assign the computed package revision to a temporary package layout
    pub fn assign_prev(&self, layout: &PackageLayout, prev: &str) -> Result<PackageLayout> {
        let new = layout.reference().with_revision(prev)?;
        self.promote_revision(layout.reference(), &new)
    }

    /// All cached recipe revisions, newest first
    ///
    /// With `only_latest_rrev` only the newest revision of every
    /// `name/version[@user/channel]` is returned.
    pub fn list_references(&self, only_latest_rrev: bool) -> Result<Vec<RecipeReference>> {
        let rows = ReferenceRow::list(&self.conn, &RowFilter::default())?;
        let references = rows.iter().map(ReferenceRow::recipe_reference);

        if !only_latest_rrev {
            return Ok(references.collect());
        }

        let mut seen = HashSet::new();
        Ok(references.filter(|r| seen.insert(r.to_string())).collect())
    }

    /// Revisions of one recipe, newest first
    ///
    /// A revision on `reference` restricts the result to that revision.
    pub fn get_recipe_revisions(
        &self,
        reference: &RecipeReference,
        only_latest: bool,
    ) -> Result<Vec<RecipeReference>> {
        let filter = RowFilter {
            recipe: Some(reference.to_string()),
            rrev: reference.revision().map(str::to_string),
            ..Default::default()
        };
        let mut revisions: Vec<RecipeReference> = ReferenceRow::list(&self.conn, &filter)?
            .iter()
            .map(ReferenceRow::recipe_reference)
            .collect();

        if only_latest {
            revisions.truncate(1);
        }
        Ok(revisions)
    }

    /// Package ids built from one recipe revision, each with its latest
    /// package revision
    pub fn get_package_ids(&self, reference: &RecipeReference) -> Result<Vec<PackageReference>> {
        let rrev = reference.revision().ok_or_else(|| {
            Error::InvalidReference(format!(
                "Recipe revision must be known to list packages of '{}'",
                reference
            ))
        })?;
        let filter = RowFilter {
            recipe: Some(reference.to_string()),
            rrev: Some(rrev.to_string()),
            packages: true,
            ..Default::default()
        };

        let mut seen = HashSet::new();
        Ok(ReferenceRow::list(&self.conn, &filter)?
            .iter()
            .filter_map(ReferenceRow::package_reference)
            .filter(|p| seen.insert(p.package_id().to_string()))
            .collect())
    }

    /// Revisions of one package id, newest first
    pub fn get_package_revisions(
        &self,
        reference: &PackageReference,
        only_latest: bool,
    ) -> Result<Vec<PackageReference>> {
        let recipe = reference.recipe();
        let rrev = recipe.revision().ok_or_else(|| {
            Error::InvalidReference(format!(
                "Recipe revision must be known to list revisions of '{}'",
                reference
            ))
        })?;
        let filter = RowFilter {
            recipe: Some(recipe.to_string()),
            rrev: Some(rrev.to_string()),
            packages: true,
            pkgid: Some(reference.package_id().to_string()),
            prev: reference.revision().map(str::to_string),
            ..Default::default()
        };

        let mut revisions: Vec<PackageReference> = ReferenceRow::list(&self.conn, &filter)?
            .iter()
            .filter_map(ReferenceRow::package_reference)
            .collect();

        if only_latest {
            revisions.truncate(1);
        }
        Ok(revisions)
    }

    /// Update bookkeeping fields of a cached reference
    pub fn update_reference<R: Revisioned>(
        &self,
        reference: &R,
        update: ReferenceUpdate,
    ) -> Result<()> {
        let changes = RowUpdate {
            remote: update.remote,
            build_id: update.build_id,
            timestamp: update.timestamp,
            ..Default::default()
        };
        ReferenceRow::update(&self.conn, &reference.cache_key(), &changes)
    }

    /// Record (or clear) the remote a reference was retrieved from
    pub fn set_remote<R: Revisioned>(&self, reference: &R, remote: Option<&str>) -> Result<()> {
        ReferenceRow::set_remote(&self.conn, &reference.cache_key(), remote)
    }

    pub fn get_remote<R: Revisioned>(&self, reference: &R) -> Result<Option<String>> {
        Ok(ReferenceRow::get(&self.conn, &reference.cache_key())?.remote)
    }

    /// Seconds since the epoch of the last write, 0 for temporary layouts
    pub fn get_timestamp<R: Revisioned>(&self, reference: &R) -> Result<f64> {
        Ok(ReferenceRow::get(&self.conn, &reference.cache_key())?.timestamp)
    }

    pub fn get_build_id<R: Revisioned>(&self, reference: &R) -> Result<Option<String>> {
        Ok(ReferenceRow::get(&self.conn, &reference.cache_key())?.build_id)
    }

    /// Remove a reference from the index and delete its folder
    pub fn remove<R: Revisioned>(&self, reference: &R) -> Result<()> {
        let key = reference.cache_key();
        let _lock = self.lock(reference)?;

        let row = ReferenceRow::get(&self.conn, &key)?;
        ReferenceRow::delete(&self.conn, &key)?;

        let path = self.full_path(&row.path);
        if path.exists() {
            fs::remove_dir_all(&path).map_err(|source| Error::FilesystemBusy {
                path: path.clone(),
                source,
            })?;
        }

        info!("Removed {} from the cache", key.full_reference());
        Ok(())
    }

    /// Write a human readable listing of the index
    pub fn dump<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "{}", "*".repeat(40))?;
        writeln!(out, "Base folder: {}", self.root.display())?;
        writeln!(out)?;

        for row in ReferenceRow::list_all(&self.conn)? {
            let remote = row.remote.as_deref().unwrap_or("-");
            writeln!(
                out,
                "{} => {} (timestamp {}, remote {})",
                row.key.full_reference(),
                row.path,
                row.timestamp,
                remote
            )?;
        }
        Ok(())
    }

    /// Rows whose folder does not exist
    ///
    /// A crash between an index update and the folder move leaves such rows
    /// behind; they fail `get_layout` with `CacheCorruption` until removed.
    pub fn missing_directories(&self) -> Result<Vec<ReferenceRow>> {
        Ok(ReferenceRow::list_all(&self.conn)?
            .into_iter()
            .filter(|row| !self.full_path(&row.path).is_dir())
            .collect())
    }

    fn full_path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn lock<R: Revisioned>(&self, reference: &R) -> Result<lock::LockGuard> {
        let coordinates = reference.lock_coordinates();
        lock::acquire(
            &lock::lock_path(&self.root, &coordinates),
            self.config.lock_timeout(),
            &coordinates,
        )
    }

    fn require_final_revision<R: Revisioned>(&self, reference: &R) -> Result<()> {
        if !reference.has_final_revision() {
            return Err(Error::InvalidReference(format!(
                "'{}' needs a final revision",
                reference.full_reference()
            )));
        }
        Ok(())
    }

    /// Shortest prefix of `digest`, at least `min_len` long, that no other
    /// reference uses
    fn calculate_path(
        &self,
        key: &CacheKey,
        digest: &str,
        namespace: Option<&str>,
        min_len: usize,
    ) -> Result<(String, usize)> {
        for len in min_len..=digest.len() {
            let candidate = match namespace {
                Some(ns) => format!("{}/{}", ns, &digest[..len]),
                None => digest[..len].to_string(),
            };
            if !ReferenceRow::path_used_by_other(&self.conn, &candidate, key)? {
                return Ok((candidate, len));
            }
            debug!("Path {} is taken, trying a longer prefix", candidate);
        }

        Err(Error::AlreadyExists(format!(
            "no free path for {}",
            key.full_reference()
        )))
    }

    /// Reserve a path for `key` and insert its row
    fn allocate(
        &self,
        key: &CacheKey,
        digest: &str,
        namespace: Option<&str>,
        timestamp: f64,
    ) -> Result<ReferenceRow> {
        let mut min_len = self.config.hash_min_size;

        loop {
            let (path, len) = self.calculate_path(key, digest, namespace, min_len)?;
            let mut row = ReferenceRow::new(key.clone(), path, timestamp);

            match row.insert(&self.conn) {
                Ok(_) => return Ok(row),
                Err(e) if db::is_unique_violation(&e) => {
                    if ReferenceRow::find(&self.conn, key)?.is_some() {
                        return Err(Error::AlreadyExists(key.full_reference()));
                    }
                    warn!(
                        "Path {} was taken by another process, retrying with a longer prefix",
                        row.path
                    );
                    min_len = len + 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Create the folder of a freshly inserted row, dropping the row if that fails
    fn create_folder(&self, row: &ReferenceRow, remove_contents: bool) -> Result<()> {
        let result = prepare_folder(&self.full_path(&row.path), remove_contents);
        if result.is_err() {
            ReferenceRow::delete(&self.conn, &row.key)?;
        }
        result
    }
}

fn prepare_folder(path: &Path, remove_contents: bool) -> Result<()> {
    if remove_contents {
        clear_folder(path)?;
    }
    fs::create_dir_all(path)?;
    Ok(())
}

/// Remove whatever occupies `path`
fn clear_folder(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(|source| Error::FilesystemBusy {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Move `src` to the cleared location `dest`
fn move_folder(src: &Path, dest: &Path) -> Result<()> {
    if src == dest {
        return Ok(());
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(src, dest).map_err(|source| Error::FilesystemBusy {
        path: src.to_path_buf(),
        source,
    })?;
    Ok(())
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Seconds since the epoch with sub-second precision
fn now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
