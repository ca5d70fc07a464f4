//! Database module: row models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: row structs and their conversion into domain entities.
//! - `repo`: SQL-only functions for the digest store, the window cursor and
//!   the read-only collaborator tables.
//!
//! External modules should import from `activity_digest::db`; the repository
//! API is re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;
