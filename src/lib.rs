// src/lib.rs

//! Conary Deps
//!
//! Dependency resolution and revisioned artifact cache for native packages.
//!
//! # Architecture
//!
//! - Reference model: `name/version[@user/channel]#rrev:package_id#prev`
//! - Graph resolver: diamond-aware expansion with version ranges, overrides,
//!   aliases and build/host contexts
//! - Content-addressed cache: hashed folders, SQLite index as source of truth
//! - Revision promotion: temporary builds moved to permanent, deduplicated
//!   storage
//! - Multi-process safe: busy timeout on the index, advisory lock per recipe

pub mod cache;
pub mod db;
mod error;
pub mod graph;
pub mod reference;

pub use error::{Error, Result};
