//! Manage beads: immutable, content-addressed archives that capture a
//! discrete computation of the form `output = code(inputs)`.
//!
//! Beads live in boxes (local directories of zip archives), are found
//! through a fluent query interface served by a persistent side-index or a
//! directory walk, and link to the beads they were computed from; the `web`
//! module turns those links into a dependency graph colored by freshness.

pub mod core;
pub mod error;
pub mod tech;
pub mod web;

pub use crate::error::{BeadError, Result};
