//! # spacelink-core
//!
//! Core crate for SpaceLink. Contains configuration schemas and the
//! configuration loader, typed identifiers, and the unified error system.
//!
//! This crate has **no** internal dependencies on other SpaceLink crates.

pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
